//! Composite reconstruction objective.
//!
//! L_total = DSSIM_mask(src) + MAE(src mask) + DSSIM_mask(dst) + MAE(dst mask)
//!
//! where DSSIM_mask(y, ŷ, m) = (1 - SSIM(y·m, ŷ·m)) / 2 and every term is
//! weighted 1.0.

use candle_core::{Device, Result, Tensor};

use crate::model::{JointInputs, JointOutput, JointTargets};

/// Structural-similarity window and stabilizing constants
#[derive(Debug, Clone)]
pub struct SsimConfig {
    /// Side of the Gaussian window
    pub window_size: usize,
    pub sigma: f64,
    pub k1: f64,
    pub k2: f64,
    /// Dynamic range of pixel values
    pub max_value: f64,
}

impl Default for SsimConfig {
    fn default() -> Self {
        Self {
            window_size: 11,
            sigma: 1.5,
            k1: 0.01,
            k2: 0.03,
            max_value: 1.0,
        }
    }
}

/// Structural dissimilarity restricted to a mask
pub struct MaskedDssim {
    window: Tensor,
    config: SsimConfig,
}

impl MaskedDssim {
    pub fn new(config: SsimConfig, device: &Device) -> Result<Self> {
        let window = gaussian_window(config.window_size, config.sigma, device)?;
        Ok(Self { window, config })
    }

    /// # Arguments
    /// * `pred` - Reconstruction [batch, C, H, W]
    /// * `target` - Target image [batch, C, H, W]
    /// * `mask` - Foreground mask [batch, 1, H, W]
    ///
    /// # Returns
    /// Scalar loss averaged over the batch
    pub fn loss(&self, pred: &Tensor, target: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let target = target.broadcast_mul(mask)?;
        let pred = pred.broadcast_mul(mask)?;

        let ssim = self.ssim(&target, &pred)?;
        ssim.affine(-0.5, 0.5)?.mean_all()
    }

    /// Mean SSIM per image, shape [batch]
    pub fn ssim(&self, x: &Tensor, y: &Tensor) -> Result<Tensor> {
        let (batch, channels, height, width) = x.dims4()?;
        let size = self.config.window_size;
        if height < size || width < size {
            candle_core::bail!("SSIM window {size} is larger than the {height}x{width} image");
        }

        // Filter every channel independently with the same window
        let x = x.reshape((batch * channels, 1, height, width))?;
        let y = y.reshape((batch * channels, 1, height, width))?;
        let filter = |t: &Tensor| t.conv2d(&self.window, 0, 1, 1, 1);

        let mu_x = filter(&x)?;
        let mu_y = filter(&y)?;
        let mu_x2 = mu_x.sqr()?;
        let mu_y2 = mu_y.sqr()?;
        let mu_xy = (&mu_x * &mu_y)?;

        let sigma_x2 = (filter(&x.sqr()?)? - &mu_x2)?;
        let sigma_y2 = (filter(&y.sqr()?)? - &mu_y2)?;
        let sigma_xy = (filter(&(&x * &y)?)? - &mu_xy)?;

        let c1 = (self.config.k1 * self.config.max_value).powi(2);
        let c2 = (self.config.k2 * self.config.max_value).powi(2);

        let luminance = (((&mu_xy * 2.0)? + c1)? / ((mu_x2 + mu_y2)? + c1)?)?;
        let contrast_structure = (((&sigma_xy * 2.0)? + c2)? / ((sigma_x2 + sigma_y2)? + c2)?)?;
        let ssim_map = (luminance * contrast_structure)?;

        let per_image = ssim_map.elem_count() / batch;
        ssim_map.reshape((batch, per_image))?.mean(1)
    }

    pub fn config(&self) -> &SsimConfig {
        &self.config
    }
}

/// Normalized 2D Gaussian, shape [1, 1, size, size]
fn gaussian_window(size: usize, sigma: f64, device: &Device) -> Result<Tensor> {
    let center = (size as f64 - 1.0) / 2.0;
    let g: Vec<f64> = (0..size)
        .map(|i| (-((i as f64 - center).powi(2)) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f64 = g.iter().sum();

    let mut window = Vec::with_capacity(size * size);
    for gy in &g {
        for gx in &g {
            window.push((gy * gx / (total * total)) as f32);
        }
    }

    Tensor::from_vec(window, (1, 1, size, size), device)
}

/// Mean absolute pixel error
pub fn mean_absolute_error(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    (pred - target)?.abs()?.mean_all()
}

/// The four per-output losses and their sum, still attached to the graph
pub struct LossTerms {
    pub src_color: Tensor,
    pub src_mask: Tensor,
    pub dst_color: Tensor,
    pub dst_mask: Tensor,
    pub total: Tensor,
}

impl LossTerms {
    pub fn to_scalars(&self) -> Result<StepLosses> {
        Ok(StepLosses {
            total: self.total.to_scalar::<f32>()?,
            src_color: self.src_color.to_scalar::<f32>()?,
            src_mask: self.src_mask.to_scalar::<f32>()?,
            dst_color: self.dst_color.to_scalar::<f32>()?,
            dst_mask: self.dst_mask.to_scalar::<f32>()?,
        })
    }
}

/// Scalar metrics of one training step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLosses {
    pub total: f32,
    pub src_color: f32,
    pub src_mask: f32,
    pub dst_color: f32,
    pub dst_mask: f32,
}

impl StepLosses {
    pub fn is_finite(&self) -> bool {
        [
            self.total,
            self.src_color,
            self.src_mask,
            self.dst_color,
            self.dst_mask,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    /// The per-domain color losses reported during training
    pub fn summary(&self) -> [(&'static str, f32); 2] {
        [("loss_src", self.src_color), ("loss_dst", self.dst_color)]
    }
}

/// Assigns a loss to each joint output and sums them
pub struct LossComposer {
    dssim: MaskedDssim,
}

impl LossComposer {
    pub fn new(device: &Device) -> Result<Self> {
        Ok(Self {
            dssim: MaskedDssim::new(SsimConfig::default(), device)?,
        })
    }

    pub fn with_ssim(config: SsimConfig, device: &Device) -> Result<Self> {
        Ok(Self {
            dssim: MaskedDssim::new(config, device)?,
        })
    }

    pub fn compose(
        &self,
        inputs: &JointInputs,
        outputs: &JointOutput,
        targets: &JointTargets,
    ) -> Result<LossTerms> {
        let src_color = self
            .dssim
            .loss(&outputs.src_color, &targets.src_color, &inputs.src_mask)?;
        let src_mask = mean_absolute_error(&outputs.src_mask, &targets.src_mask)?;
        let dst_color = self
            .dssim
            .loss(&outputs.dst_color, &targets.dst_color, &inputs.dst_mask)?;
        let dst_mask = mean_absolute_error(&outputs.dst_mask, &targets.dst_mask)?;

        let total = (((&src_color + &src_mask)? + &dst_color)? + &dst_mask)?;

        Ok(LossTerms {
            src_color,
            src_mask,
            dst_color,
            dst_mask,
            total,
        })
    }

    pub fn dssim(&self) -> &MaskedDssim {
        &self.dssim
    }
}
