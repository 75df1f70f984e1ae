//! Construction through training, preview and conversion at 128×128.

use candle_core::{Device, Tensor};

use faceswap_core::{Domain, ModelConfig, Result, FACE_RESOLUTION};
use faceswap_h128::{
    AutoencoderH128, FacePredictor, PreviewComposer, SampleSource, SyntheticConfig, SyntheticSamples, Tier,
    Trainer,
};

fn samples(domain: Domain, batch_size: usize) -> SyntheticSamples {
    let config = SyntheticConfig {
        resolution: FACE_RESOLUTION,
        batch_size,
        seed: 0,
    };
    SyntheticSamples::new(config, domain, &Device::Cpu)
}

#[test]
fn low_capacity_training_step() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = ModelConfig {
        model_dir: dir.path().to_path_buf(),
        capacity_gb: 3.0,
        ..Default::default()
    };

    let model = AutoencoderH128::new(config)?;
    assert_eq!(model.tier(), Tier::Low);
    assert_eq!(model.tier().as_str(), "low");
    assert_eq!(model.batch_size(), 2);
    assert_eq!(model.resolution(), 128);

    let batch_size = model.batch_size();
    let src = samples(Domain::Src, batch_size).next_batch()?;
    let dst = samples(Domain::Dst, batch_size).next_batch()?;
    assert_eq!(src.warped.dims(), &[2, 128, 128, 3]);
    assert_eq!(dst.target_mask.dims(), &[2, 128, 128, 1]);

    let mut trainer = Trainer::new(model)?;
    let losses = trainer.step(&src, &dst)?;
    for value in [
        losses.total,
        losses.src_color,
        losses.src_mask,
        losses.dst_color,
        losses.dst_mask,
    ] {
        assert!(value.is_finite());
    }

    let model = trainer.into_model();
    let preview = PreviewComposer::for_model(&model).compose(&model, &src, &dst)?;
    assert_eq!(preview.image.dims(), &[2 * 128, 5 * 128, 3]);

    let face = Tensor::cat(&[&src.target.get(0)?, &src.target_mask.get(0)?], 2)?;
    let converted = model.converter(None).predict(&face)?;
    assert_eq!(converted.dims(), &[128, 128, 4]);
    Ok(())
}

#[test]
fn views_are_deterministic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = ModelConfig {
        model_dir: dir.path().to_path_buf(),
        capacity_gb: 2.0,
        ..Default::default()
    };
    let model = AutoencoderH128::new(config)?;
    let image = samples(Domain::Dst, 1).next_batch()?.target;

    let (first, first_mask) = model.src_view(&image)?;
    let (second, second_mask) = model.src_view(&image)?;
    assert_eq!(
        first.flatten_all()?.to_vec1::<f32>()?,
        second.flatten_all()?.to_vec1::<f32>()?
    );
    assert_eq!(
        first_mask.flatten_all()?.to_vec1::<f32>()?,
        second_mask.flatten_all()?.to_vec1::<f32>()?
    );
    Ok(())
}
