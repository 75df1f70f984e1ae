//! Sample batches supplied by the external sample generator.
//!
//! Batches arrive channels-last (`[batch, R, R, C]`, values in [0, 1]);
//! the networks run channels-first. Conversion happens here, at the
//! boundary, and every shape is checked before it reaches a network.

use candle_core::{Device, Tensor};

use faceswap_core::{Domain, Error, Result, COLOR_CHANNELS, MASK_CHANNELS};

/// One domain's `(warped, target, target_mask)` batch, channels-last
#[derive(Debug, Clone)]
pub struct SampleBatch {
    /// Augmented input images [batch, R, R, 3]
    pub warped: Tensor,
    /// Reconstruction targets [batch, R, R, 3]
    pub target: Tensor,
    /// Foreground masks aligned with `target` [batch, R, R, 1]
    pub target_mask: Tensor,
}

impl SampleBatch {
    /// Build a batch, failing fast if the three tensors disagree with each other
    /// or with the expected `resolution`.
    pub fn new(warped: Tensor, target: Tensor, target_mask: Tensor, resolution: usize) -> Result<Self> {
        let batch = warped.dims().first().copied().unwrap_or(0);
        if batch == 0 {
            return Err(Error::InvalidInput("sample batch is empty".into()));
        }

        expect_shape("warped", &warped, &[batch, resolution, resolution, COLOR_CHANNELS])?;
        expect_shape("target", &target, &[batch, resolution, resolution, COLOR_CHANNELS])?;
        expect_shape(
            "target_mask",
            &target_mask,
            &[batch, resolution, resolution, MASK_CHANNELS],
        )?;

        Ok(Self {
            warped,
            target,
            target_mask,
        })
    }

    pub fn len(&self) -> usize {
        self.warped.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resolution(&self) -> usize {
        self.warped.dims().get(1).copied().unwrap_or(0)
    }

    /// First `n` samples (or all of them if fewer are available)
    pub fn head(&self, n: usize) -> Result<Self> {
        let n = n.min(self.len());
        Ok(Self {
            warped: self.warped.narrow(0, 0, n)?,
            target: self.target.narrow(0, 0, n)?,
            target_mask: self.target_mask.narrow(0, 0, n)?,
        })
    }
}

/// Boundary to the sample generator: one batch per call for a fixed domain.
pub trait SampleSource {
    fn domain(&self) -> Domain;

    fn next_batch(&mut self) -> Result<SampleBatch>;
}

pub fn expect_shape(what: &'static str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() != expected {
        return Err(Error::shape_mismatch(what, expected, tensor.dims()));
    }
    Ok(())
}

/// `[b, h, w, c]` to `[b, c, h, w]`
pub fn to_channels_first(t: &Tensor) -> candle_core::Result<Tensor> {
    t.permute((0, 3, 1, 2))?.contiguous()
}

/// `[b, c, h, w]` to `[b, h, w, c]`
pub fn to_channels_last(t: &Tensor) -> candle_core::Result<Tensor> {
    t.permute((0, 2, 3, 1))?.contiguous()
}

/// Configuration for the deterministic synthetic source
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub resolution: usize,
    pub batch_size: usize,
    /// Offsets the generated pattern so different seeds give different faces
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            resolution: faceswap_core::FACE_RESOLUTION,
            batch_size: 2,
            seed: 0,
        }
    }
}

/// Procedural stand-in for the external sample generator.
///
/// Targets are smooth interference patterns inside an elliptical face
/// mask; the warped input is the target shifted by up to one pixel. The
/// same `(config, domain, cursor)` always yields the same batch.
pub struct SyntheticSamples {
    config: SyntheticConfig,
    domain: Domain,
    device: Device,
    cursor: u64,
}

impl SyntheticSamples {
    pub fn new(config: SyntheticConfig, domain: Domain, device: &Device) -> Self {
        Self {
            config,
            domain,
            device: device.clone(),
            cursor: 0,
        }
    }

    pub fn batch_at(&self, index: u64) -> Result<SampleBatch> {
        let r = self.config.resolution;
        let n = self.config.batch_size;
        let mut warped = Vec::with_capacity(n * r * r * COLOR_CHANNELS);
        let mut target = Vec::with_capacity(n * r * r * COLOR_CHANNELS);
        let mut mask = Vec::with_capacity(n * r * r);

        for i in 0..n {
            let sample = index * n as u64 + i as u64;
            let shift = (sample % 3) as isize - 1;
            for y in 0..r {
                for x in 0..r {
                    let wx = (x as isize + shift).clamp(0, r as isize - 1) as usize;
                    for c in 0..COLOR_CHANNELS {
                        target.push(self.pixel(sample, x, y, c));
                        warped.push(self.pixel(sample, wx, y, c));
                    }
                    mask.push(self.mask_value(x, y));
                }
            }
        }

        let warped = Tensor::from_vec(warped, (n, r, r, COLOR_CHANNELS), &self.device)?;
        let target = Tensor::from_vec(target, (n, r, r, COLOR_CHANNELS), &self.device)?;
        let mask = Tensor::from_vec(mask, (n, r, r, MASK_CHANNELS), &self.device)?;

        SampleBatch::new(warped, target, mask, r)
    }

    fn pixel(&self, sample: u64, x: usize, y: usize, c: usize) -> f32 {
        let r = self.config.resolution as f32;
        let domain_phase = match self.domain {
            Domain::Src => 0.0,
            Domain::Dst => 1.7,
        };
        let phase = domain_phase + (self.config.seed as f32) * 0.31 + (sample as f32) * 0.53;
        let fx = 2.0 + c as f32;
        let fy = 3.0 - c as f32 * 0.5;
        let u = x as f32 / r * std::f32::consts::TAU;
        let v = y as f32 / r * std::f32::consts::TAU;

        0.5 + 0.4 * (fx * u + phase).sin() * (fy * v - phase).cos()
    }

    fn mask_value(&self, x: usize, y: usize) -> f32 {
        let r = self.config.resolution as f32;
        let dx = (x as f32 + 0.5 - r / 2.0) / (0.35 * r);
        let dy = (y as f32 + 0.5 - r / 2.0) / (0.45 * r);
        if dx * dx + dy * dy <= 1.0 {
            1.0
        } else {
            0.0
        }
    }
}

impl SampleSource for SyntheticSamples {
    fn domain(&self) -> Domain {
        self.domain
    }

    fn next_batch(&mut self) -> Result<SampleBatch> {
        let batch = self.batch_at(self.cursor)?;
        self.cursor += 1;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn source(domain: Domain) -> SyntheticSamples {
        let config = SyntheticConfig {
            resolution: 16,
            batch_size: 3,
            seed: 7,
        };
        SyntheticSamples::new(config, domain, &Device::Cpu)
    }

    #[test]
    fn test_synthetic_shapes() -> Result<()> {
        let mut src = source(Domain::Src);
        let batch = src.next_batch()?;
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.resolution(), 16);
        assert_eq!(batch.warped.dims(), &[3, 16, 16, 3]);
        assert_eq!(batch.target_mask.dims(), &[3, 16, 16, 1]);
        Ok(())
    }

    #[test]
    fn test_synthetic_values_normalized() -> Result<()> {
        let batch = source(Domain::Dst).batch_at(4)?;
        let min = batch.target.min_all()?.to_scalar::<f32>()?;
        let max = batch.target.max_all()?.to_scalar::<f32>()?;
        assert!(min >= 0.0 && max <= 1.0);

        let mask: Vec<f32> = batch.target_mask.flatten_all()?.to_vec1()?;
        assert!(mask.iter().all(|&m| m == 0.0 || m == 1.0));
        assert!(mask.iter().any(|&m| m == 1.0));
        Ok(())
    }

    #[test]
    fn test_synthetic_is_deterministic() -> Result<()> {
        let a: Vec<f32> = source(Domain::Src).batch_at(2)?.target.flatten_all()?.to_vec1()?;
        let b: Vec<f32> = source(Domain::Src).batch_at(2)?.target.flatten_all()?.to_vec1()?;
        let other: Vec<f32> = source(Domain::Dst).batch_at(2)?.target.flatten_all()?.to_vec1()?;
        assert_eq!(a, b);
        assert_ne!(a, other);
        Ok(())
    }

    #[test]
    fn test_rejects_mismatched_mask() -> candle_core::Result<()> {
        let device = Device::Cpu;
        let image = Tensor::zeros((2, 8, 8, 3), DType::F32, &device)?;
        let mask = Tensor::zeros((2, 8, 8, 3), DType::F32, &device)?;

        match SampleBatch::new(image.clone(), image, mask, 8) {
            Err(Error::ShapeMismatch { what, .. }) => assert_eq!(what, "target_mask"),
            other => panic!("expected shape mismatch, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_layout_roundtrip() -> candle_core::Result<()> {
        let t = Tensor::arange(0f32, 24.0, &Device::Cpu)?.reshape((1, 2, 3, 4))?;
        let back = to_channels_last(&to_channels_first(&t)?)?;
        assert_eq!(to_channels_first(&t)?.dims(), &[1, 4, 2, 3]);
        assert_eq!(
            back.flatten_all()?.to_vec1::<f32>()?,
            t.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }
}
