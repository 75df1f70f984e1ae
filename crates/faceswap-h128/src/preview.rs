//! Side-by-side reconstruction grid for human inspection.

use std::path::Path;

use candle_core::{DType, Tensor};
use image::RgbImage;
use tracing::debug;

use faceswap_core::{Error, Result, COLOR_CHANNELS};

use crate::model::AutoencoderH128;
use crate::samples::SampleBatch;

pub const PREVIEW_LABEL: &str = "H128";

/// Columns of one preview row
const COLUMNS: usize = 5;

/// A labeled composite image, channels-last `[rows·R, 5·R, 3]` in [0, 1]
#[derive(Debug, Clone)]
pub struct Preview {
    pub label: &'static str,
    pub image: Tensor,
}

impl Preview {
    pub fn height(&self) -> Result<usize> {
        Ok(self.image.dims3()?.0)
    }

    pub fn width(&self) -> Result<usize> {
        Ok(self.image.dims3()?.1)
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let (height, width, _) = self.image.dims3()?;
        let pixels = (self.image.clamp(0f32, 1f32)? * 255.0)?
            .round()?
            .to_dtype(DType::U8)?
            .flatten_all()?
            .to_vec1::<u8>()?;

        RgbImage::from_raw(width as u32, height as u32, pixels)
            .ok_or_else(|| Error::InvalidInput("preview buffer does not match its dimensions".into()))
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_rgb_image()?
            .save_with_format(path.as_ref(), image::ImageFormat::Png)?;
        Ok(())
    }
}

pub struct PreviewComposer {
    samples: usize,
}

impl Default for PreviewComposer {
    fn default() -> Self {
        Self { samples: 4 }
    }
}

impl PreviewComposer {
    pub fn new(samples: usize) -> Self {
        Self { samples: samples.max(1) }
    }

    /// Row count taken from the model's `preview_samples` setting
    pub fn for_model(model: &AutoencoderH128) -> Self {
        Self::new(model.config().preview_samples)
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Build rows of `[src | src→src | dst | dst→dst | dst→src]`.
    ///
    /// Uses the first `samples` targets of each batch, fewer if a batch is
    /// shorter. Parameters are only read.
    pub fn compose(&self, model: &AutoencoderH128, src: &SampleBatch, dst: &SampleBatch) -> Result<Preview> {
        let n = self.samples.min(src.len()).min(dst.len());
        if n == 0 {
            return Err(Error::InvalidInput("preview needs at least one sample per domain".into()));
        }

        let test_src = src.target.narrow(0, 0, n)?;
        let test_dst = dst.target.narrow(0, 0, n)?;

        let (recon_src, _) = model.src_view(&test_src)?;
        let (recon_dst, _) = model.dst_view(&test_dst)?;
        let (swapped, _) = model.src_view(&test_dst)?;

        // [n, R, 5R, 3] then stack rows vertically
        let rows = Tensor::cat(&[&test_src, &recon_src, &test_dst, &recon_dst, &swapped], 2)?;
        let r = model.resolution();
        let image = rows.reshape((n * r, COLUMNS * r, COLOR_CHANNELS))?;

        debug!(rows = n, label = PREVIEW_LABEL, "composed preview");
        Ok(Preview {
            label: PREVIEW_LABEL,
            image,
        })
    }
}
