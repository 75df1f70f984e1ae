//! Shared-encoder, dual-decoder H128 autoencoder.
//!
//! One encoder parameter set feeds two independent decoders. During
//! training both domains pass through the same encoder, so gradients from
//! the src and dst paths accumulate into a single set of encoder variables
//! before the optimizer applies one update.

use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use tracing::info;

use faceswap_core::{Domain, ModelConfig, Result, COLOR_CHANNELS, MASK_CHANNELS};

use crate::architecture::{ArchitectureBuilder, ArchitectureProfile, BuildContext, Decoder, Encoder};
use crate::checkpoint::{Artifact, CheckpointState, CheckpointStore, ParameterSets};
use crate::samples::{expect_shape, to_channels_first, to_channels_last, SampleBatch};
use crate::tier::{self, Tier, TierSelection};

/// The three independently owned parameter sets
pub struct ModelParameters {
    pub encoder: VarMap,
    pub decoder_src: VarMap,
    pub decoder_dst: VarMap,
}

impl ModelParameters {
    fn new() -> Self {
        Self {
            encoder: VarMap::new(),
            decoder_src: VarMap::new(),
            decoder_dst: VarMap::new(),
        }
    }

    /// Every trainable variable, encoder first
    pub fn all_vars(&self) -> Vec<Var> {
        Artifact::ALL
            .into_iter()
            .flat_map(|a| self.params(a).all_vars())
            .collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.all_vars().iter().map(|v| v.elem_count()).sum()
    }
}

impl ParameterSets for ModelParameters {
    fn params(&self, artifact: Artifact) -> &VarMap {
        match artifact {
            Artifact::Encoder => &self.encoder,
            Artifact::DecoderSrc => &self.decoder_src,
            Artifact::DecoderDst => &self.decoder_dst,
        }
    }

    fn params_mut(&mut self, artifact: Artifact) -> &mut VarMap {
        match artifact {
            Artifact::Encoder => &mut self.encoder,
            Artifact::DecoderSrc => &mut self.decoder_src,
            Artifact::DecoderDst => &mut self.decoder_dst,
        }
    }
}

/// Inputs of the joint graph, channels-first.
///
/// The masks are not consumed by the forward pass; they travel with the
/// inputs so the masked color losses can read them.
pub struct JointInputs {
    pub src_image: Tensor,
    pub src_mask: Tensor,
    pub dst_image: Tensor,
    pub dst_mask: Tensor,
}

impl JointInputs {
    /// Warped images and target masks of one batch per domain
    pub fn from_batches(src: &SampleBatch, dst: &SampleBatch) -> Result<Self> {
        Ok(Self {
            src_image: to_channels_first(&src.warped)?,
            src_mask: to_channels_first(&src.target_mask)?,
            dst_image: to_channels_first(&dst.warped)?,
            dst_mask: to_channels_first(&dst.target_mask)?,
        })
    }
}

/// Reconstruction targets of the joint graph, channels-first
pub struct JointTargets {
    pub src_color: Tensor,
    pub src_mask: Tensor,
    pub dst_color: Tensor,
    pub dst_mask: Tensor,
}

impl JointTargets {
    pub fn from_batches(src: &SampleBatch, dst: &SampleBatch) -> Result<Self> {
        Ok(Self {
            src_color: to_channels_first(&src.target)?,
            src_mask: to_channels_first(&src.target_mask)?,
            dst_color: to_channels_first(&dst.target)?,
            dst_mask: to_channels_first(&dst.target_mask)?,
        })
    }
}

/// The four outputs of the joint graph, channels-first
pub struct JointOutput {
    pub src_color: Tensor,
    pub src_mask: Tensor,
    pub dst_color: Tensor,
    pub dst_mask: Tensor,
}

/// Encoder followed by a single decoder.
///
/// Takes the parameter sets explicitly and reads them only.
///
/// # Arguments
/// * `image` - channels-first images [batch, 3, R, R]
///
/// # Returns
/// `(color [batch, 3, R, R], mask [batch, 1, R, R])`
pub fn view(encoder: &Encoder, decoder: &Decoder, image: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
    let latent = encoder.forward(image)?;
    decoder.forward(&latent)
}

pub struct AutoencoderH128 {
    encoder: Encoder,
    decoder_src: Decoder,
    decoder_dst: Decoder,
    params: ModelParameters,
    selection: TierSelection,
    profile: ArchitectureProfile,
    batch_size: usize,
    store: CheckpointStore,
    loaded: bool,
    device: Device,
    config: ModelConfig,
}

impl AutoencoderH128 {
    /// Select the tier from the configured capacity, build the networks and
    /// load the checkpoint in `model_dir` if one exists.
    pub fn new(config: ModelConfig) -> Result<Self> {
        let tier = Tier::from_capacity(config.capacity_gb);
        Self::with_profile(config, ArchitectureProfile::for_tier(tier))
    }

    /// Like [`AutoencoderH128::new`] but with an explicit channel schedule.
    ///
    /// The batch-size bound still follows the configured capacity.
    pub fn with_profile(config: ModelConfig, profile: ArchitectureProfile) -> Result<Self> {
        config.validate()?;
        let selection = tier::select(config.capacity_gb, config.platform);
        let batch_size = selection.effective_batch_size(config.batch_size);
        info!(
            capacity_gb = config.capacity_gb,
            tier = %selection.tier,
            batch_size,
            "selected architecture tier"
        );

        let device = config.device.to_device()?;
        let ctx = BuildContext::new(&device);
        let builder = ArchitectureBuilder::new(profile)?;

        let mut params = ModelParameters::new();
        let encoder = builder.encoder(&ctx, &params.encoder)?;
        let decoder_src = builder.decoder(&ctx, &params.decoder_src)?;
        let decoder_dst = builder.decoder(&ctx, &params.decoder_dst)?;

        let store = CheckpointStore::new(&config.model_dir);
        let loaded = match store.state() {
            CheckpointState::Absent => {
                info!(
                    dir = %store.dir().display(),
                    parameters = params.parameter_count(),
                    "no checkpoint found, starting from fresh initialization"
                );
                false
            }
            _ => {
                store.load(&mut params)?;
                true
            }
        };

        Ok(Self {
            encoder,
            decoder_src,
            decoder_dst,
            params,
            selection,
            profile: builder.profile().clone(),
            batch_size,
            store,
            loaded,
            device,
            config,
        })
    }

    /// Joint forward pass producing all four reconstructions
    pub fn forward(&self, inputs: &JointInputs) -> candle_core::Result<JointOutput> {
        let (src_color, src_mask) = view(&self.encoder, &self.decoder_src, &inputs.src_image)?;
        let (dst_color, dst_mask) = view(&self.encoder, &self.decoder_dst, &inputs.dst_image)?;

        Ok(JointOutput {
            src_color,
            src_mask,
            dst_color,
            dst_mask,
        })
    }

    /// Reconstruct through the src decoder.
    ///
    /// `image` is channels-last [batch, R, R, 3]; returns channels-last
    /// `(color [batch, R, R, 3], mask [batch, R, R, 1])`.
    pub fn src_view(&self, image: &Tensor) -> Result<(Tensor, Tensor)> {
        self.view(Domain::Src, image)
    }

    /// Reconstruct through the dst decoder; same layout as [`Self::src_view`].
    pub fn dst_view(&self, image: &Tensor) -> Result<(Tensor, Tensor)> {
        self.view(Domain::Dst, image)
    }

    pub fn view(&self, domain: Domain, image: &Tensor) -> Result<(Tensor, Tensor)> {
        let batch = image.dims().first().copied().unwrap_or(0);
        let r = self.profile.resolution;
        expect_shape("view input", image, &[batch, r, r, COLOR_CHANNELS])?;

        let (color, mask) = view(&self.encoder, self.decoder(domain), &to_channels_first(image)?)?;
        let color = to_channels_last(&color)?;
        let mask = to_channels_last(&mask)?;
        debug_assert_eq!(mask.dims()[3], MASK_CHANNELS);
        Ok((color, mask))
    }

    /// Persist all three parameter sets to `model_dir`
    pub fn save(&self) -> Result<()> {
        self.store.save(&self.params)
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self, domain: Domain) -> &Decoder {
        match domain {
            Domain::Src => &self.decoder_src,
            Domain::Dst => &self.decoder_dst,
        }
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.params
    }

    pub fn selection(&self) -> TierSelection {
        self.selection
    }

    pub fn tier(&self) -> Tier {
        self.selection.tier
    }

    /// Batch size to request from the sample generator
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn resolution(&self) -> usize {
        self.profile.resolution
    }

    pub fn profile(&self) -> &ArchitectureProfile {
        &self.profile
    }

    /// Whether the parameters came from an existing checkpoint
    pub fn loaded_from_checkpoint(&self) -> bool {
        self.loaded
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::{SyntheticConfig, SyntheticSamples};

    fn compact_model(dir: &std::path::Path) -> Result<AutoencoderH128> {
        let config = ModelConfig {
            model_dir: dir.to_path_buf(),
            capacity_gb: 3.0,
            ..Default::default()
        };
        AutoencoderH128::with_profile(config, ArchitectureProfile::compact(32))
    }

    fn batch(domain: Domain) -> Result<SampleBatch> {
        let config = SyntheticConfig {
            resolution: 32,
            batch_size: 2,
            seed: 1,
        };
        SyntheticSamples::new(config, domain, &Device::Cpu).batch_at(0)
    }

    #[test]
    fn test_joint_forward_has_four_outputs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let model = compact_model(dir.path())?;
        let inputs = JointInputs::from_batches(&batch(Domain::Src)?, &batch(Domain::Dst)?)?;

        let out = model.forward(&inputs)?;
        assert_eq!(out.src_color.dims(), &[2, 3, 32, 32]);
        assert_eq!(out.src_mask.dims(), &[2, 1, 32, 32]);
        assert_eq!(out.dst_color.dims(), &[2, 3, 32, 32]);
        assert_eq!(out.dst_mask.dims(), &[2, 1, 32, 32]);
        Ok(())
    }

    #[test]
    fn test_fresh_model_reports_selection() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let model = compact_model(dir.path())?;
        assert_eq!(model.tier(), Tier::Low);
        assert_eq!(model.batch_size(), 2);
        assert!(!model.loaded_from_checkpoint());
        assert!(model.parameters().parameter_count() > 0);
        Ok(())
    }

    #[test]
    fn test_out_of_table_capacity_clamps() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for (capacity_gb, tier, batch_size) in [(-1.0, Tier::Low, 2), (f64::INFINITY, Tier::High, 48)] {
            let config = ModelConfig {
                model_dir: dir.path().to_path_buf(),
                capacity_gb,
                ..Default::default()
            };
            let model = AutoencoderH128::with_profile(config, ArchitectureProfile::compact(32))?;
            assert_eq!(model.tier(), tier);
            assert_eq!(model.batch_size(), batch_size);
        }
        Ok(())
    }

    #[test]
    fn test_views_use_their_own_decoder() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let model = compact_model(dir.path())?;
        let image = batch(Domain::Src)?.target;

        let (src_color, src_mask) = model.src_view(&image)?;
        let (dst_color, _) = model.dst_view(&image)?;
        assert_eq!(src_color.dims(), &[2, 32, 32, 3]);
        assert_eq!(src_mask.dims(), &[2, 32, 32, 1]);

        let a: Vec<f32> = src_color.flatten_all()?.to_vec1()?;
        let b: Vec<f32> = dst_color.flatten_all()?.to_vec1()?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn test_view_rejects_wrong_shape() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let model = compact_model(dir.path())?;
        let image = Tensor::zeros((1, 3, 32, 32), candle_core::DType::F32, &Device::Cpu)?;

        assert!(matches!(
            model.src_view(&image),
            Err(faceswap_core::Error::ShapeMismatch { .. })
        ));
        Ok(())
    }
}
