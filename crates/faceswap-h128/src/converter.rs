//! Single-face predictor handed to the external compositing pipeline.

use candle_core::Tensor;
use ndarray::Array3;
use tracing::info;

use faceswap_core::{
    ConverterOverrides, Error, FaceType, Result, COLOR_CHANNELS, FACE_RESOLUTION, FACE_WITH_MASK_CHANNELS,
};

use crate::model::AutoencoderH128;
use crate::samples::expect_shape;

/// Added to both mask post-processing modifiers on top of the caller's value
pub const MASK_MODIFIER_BIAS: i32 = 100;

/// Fixed metadata read by the compositing pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConverterSettings {
    pub predictor_input_size: usize,
    pub output_size: usize,
    pub face_type: FaceType,
    pub erode_mask_modifier: i32,
    pub blur_mask_modifier: i32,
}

impl ConverterSettings {
    /// Missing overrides count as 0 before the bias is applied
    pub fn from_overrides(overrides: ConverterOverrides) -> Self {
        Self {
            predictor_input_size: FACE_RESOLUTION,
            output_size: FACE_RESOLUTION,
            face_type: FaceType::Half,
            erode_mask_modifier: biased(overrides.erode_mask_modifier),
            blur_mask_modifier: biased(overrides.blur_mask_modifier),
        }
    }
}

fn biased(modifier: Option<i32>) -> i32 {
    modifier.unwrap_or(0).saturating_add(MASK_MODIFIER_BIAS)
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self::from_overrides(ConverterOverrides::default())
    }
}

/// `face[R, R, 4] -> face[R, R, 4]`, color in the first three channels, mask last
pub trait FacePredictor {
    fn predict(&self, face: &Tensor) -> Result<Tensor>;
}

pub struct ConverterAdapter<'a> {
    model: &'a AutoencoderH128,
    settings: ConverterSettings,
}

impl<'a> ConverterAdapter<'a> {
    pub fn new(model: &'a AutoencoderH128, settings: ConverterSettings) -> Self {
        Self { model, settings }
    }

    pub fn settings(&self) -> &ConverterSettings {
        &self.settings
    }

    /// Same as [`FacePredictor::predict`] on a CPU-side array
    pub fn predict_array(&self, face: &Array3<f32>) -> Result<Array3<f32>> {
        let (h, w, c) = face.dim();
        let data: Vec<f32> = face.iter().copied().collect();
        let input = Tensor::from_vec(data, (h, w, c), self.model.device())?;

        let output = self.predict(&input)?;
        let (h, w, c) = output.dims3()?;
        let data = output.flatten_all()?.to_vec1::<f32>()?;
        Array3::from_shape_vec((h, w, c), data).map_err(|e| Error::InvalidInput(e.to_string()))
    }
}

impl FacePredictor for ConverterAdapter<'_> {
    fn predict(&self, face: &Tensor) -> Result<Tensor> {
        let r = self.model.resolution();
        expect_shape("converter face", face, &[r, r, FACE_WITH_MASK_CHANNELS])?;

        // The incoming mask channel is split off and not fed to the network
        let color = face.narrow(2, 0, COLOR_CHANNELS)?.unsqueeze(0)?;
        let (color, mask) = self.model.src_view(&color)?;

        Ok(Tensor::cat(&[&color, &mask], 3)?.squeeze(0)?)
    }
}

impl AutoencoderH128 {
    /// Converter bound to the src decoder.
    ///
    /// `overrides` falls back to the values in the model config.
    pub fn converter(&self, overrides: Option<ConverterOverrides>) -> ConverterAdapter<'_> {
        let settings = ConverterSettings::from_overrides(overrides.unwrap_or(self.config().converter));
        info!(
            erode_mask_modifier = settings.erode_mask_modifier,
            blur_mask_modifier = settings.blur_mask_modifier,
            face_type = ?settings.face_type,
            "converter settings"
        );
        ConverterAdapter::new(self, settings)
    }
}
