//! Tier-parameterized encoder and dual-branch decoder construction.
//!
//! Networks are described as an ordered list of [`StageSpec`]s and then
//! materialized by a generic stage executor ([`StageStack`]). The two
//! tiers differ only in the numbers of the [`ArchitectureProfile`] table;
//! there is a single construction path for both.
//!
//! ```text
//! image [3, R, R] ──► 4 × Downscale ──► Flatten ──► Dense(bottleneck)
//!                                                       │
//!  latent [L, R/8, R/8] ◄── Upscale ◄── Reshape ◄── Dense(L·(R/16)²)
//!
//!  latent ─┬─► 3 × Upscale ──► Head(3, sigmoid)   color
//!          └─► 3 × Upscale ──► Head(1, sigmoid)   mask
//! ```

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{conv2d, linear, ops, Conv2d, Conv2dConfig, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

use faceswap_core::{Error, COLOR_CHANNELS, FACE_RESOLUTION, MASK_CHANNELS};

use crate::tier::Tier;

/// Negative slope of every hidden activation
pub const LEAKY_RELU_SLOPE: f64 = 0.1;

const DOWNSCALE_KERNEL: usize = 5;
const UPSCALE_KERNEL: usize = 3;
const HEAD_KERNEL: usize = 5;

/// Device and dtype the networks are materialized with.
///
/// Passed explicitly to every construction call; nothing keeps it around.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub device: &'a Device,
    pub dtype: DType,
}

impl<'a> BuildContext<'a> {
    pub fn new(device: &'a Device) -> Self {
        Self {
            device,
            dtype: DType::F32,
        }
    }

    pub fn var_builder(&self, params: &VarMap) -> VarBuilder<'static> {
        VarBuilder::from_varmap(params, self.dtype, self.device)
    }
}

/// Channel schedule for one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureProfile {
    /// Side length of input and reconstructed images
    pub resolution: usize,
    /// Widths of the downscale stages, one halving per entry
    pub encoder_widths: Vec<usize>,
    /// Fully-connected bottleneck size
    pub bottleneck_dim: usize,
    /// Channels of the latent spatial map handed to the decoders
    pub latent_channels: usize,
    /// Widths of each decoder branch's upscale stages
    pub decoder_widths: Vec<usize>,
}

impl ArchitectureProfile {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::High => Self {
                resolution: FACE_RESOLUTION,
                encoder_widths: vec![128, 256, 512, 1024],
                bottleneck_dim: 512,
                latent_channels: 512,
                decoder_widths: vec![512, 256, 128],
            },
            Tier::Low => Self {
                resolution: FACE_RESOLUTION,
                encoder_widths: vec![128, 256, 512, 1024],
                bottleneck_dim: 256,
                latent_channels: 256,
                decoder_widths: vec![256, 128, 64],
            },
        }
    }

    /// A narrow profile with the same stage layout, for smoke tests and benches.
    pub fn compact(resolution: usize) -> Self {
        Self {
            resolution,
            encoder_widths: vec![8, 16, 32, 64],
            bottleneck_dim: 32,
            latent_channels: 16,
            decoder_widths: vec![16, 8, 8],
        }
    }

    /// Side of the map the bottleneck is reshaped to
    pub fn reshape_resolution(&self) -> usize {
        self.resolution >> self.encoder_widths.len()
    }

    /// Side of the latent spatial map
    pub fn latent_resolution(&self) -> usize {
        self.reshape_resolution() * 2
    }

    pub fn validate(&self) -> faceswap_core::Result<()> {
        let invalid = |reason: String| Err(Error::InvalidInput(format!("architecture: {reason}")));

        if self.encoder_widths.is_empty() || self.decoder_widths.is_empty() {
            return invalid("stage lists must not be empty".into());
        }
        let widths = self.encoder_widths.iter().chain(&self.decoder_widths);
        if widths.chain([&self.bottleneck_dim, &self.latent_channels]).any(|&w| w == 0) {
            return invalid("widths must be non-zero".into());
        }
        let stride = 1usize << self.encoder_widths.len();
        if self.resolution == 0 || self.resolution % stride != 0 {
            return invalid(format!(
                "resolution {} is not divisible by {stride}",
                self.resolution
            ));
        }
        let reconstructed = self.latent_resolution() << self.decoder_widths.len();
        if reconstructed != self.resolution {
            return invalid(format!(
                "decoder reconstructs {reconstructed}px from a {}px latent, expected {}px",
                self.latent_resolution(),
                self.resolution
            ));
        }
        Ok(())
    }

    pub fn encoder_spec(&self) -> NetworkSpec {
        let side = self.reshape_resolution();
        let mut stages: Vec<StageSpec> = self
            .encoder_widths
            .iter()
            .map(|&w| StageSpec::downscale(w))
            .collect();
        stages.push(StageSpec::flatten());
        stages.push(StageSpec::dense(self.bottleneck_dim));
        stages.push(StageSpec::dense(side * side * self.latent_channels));
        stages.push(StageSpec::reshape(self.latent_channels, side));
        stages.push(StageSpec::upscale(self.latent_channels));

        NetworkSpec {
            input: FeatureShape::image(COLOR_CHANNELS, self.resolution),
            stages,
        }
    }

    pub fn decoder_spec(&self) -> DecoderSpec {
        let input = FeatureShape::image(self.latent_channels, self.latent_resolution());
        let branch = |out_channels: usize| {
            let mut stages: Vec<StageSpec> = self
                .decoder_widths
                .iter()
                .map(|&w| StageSpec::upscale(w))
                .collect();
            stages.push(StageSpec::head(out_channels));
            NetworkSpec { input, stages }
        };

        DecoderSpec {
            color: branch(COLOR_CHANNELS),
            mask: branch(MASK_CHANNELS),
        }
    }
}

/// Shape of a single sample flowing between stages (batch dim excluded)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureShape {
    Spatial {
        channels: usize,
        height: usize,
        width: usize,
    },
    Flat(usize),
}

impl FeatureShape {
    pub fn image(channels: usize, side: usize) -> Self {
        FeatureShape::Spatial {
            channels,
            height: side,
            width: side,
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        match *self {
            FeatureShape::Spatial {
                channels,
                height,
                width,
            } => vec![channels, height, width],
            FeatureShape::Flat(n) => vec![n],
        }
    }

    fn len(&self) -> usize {
        self.dims().iter().product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Strided convolution halving the spatial size, LeakyReLU
    Downscale,
    /// 2× nearest resize then convolution, LeakyReLU
    Upscale,
    Flatten,
    Dense,
    /// Unflatten into a square map of the given side
    Reshape { side: usize },
    /// Output convolution with sigmoid activation
    Head,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub kind: StageKind,
    /// Output channels (or units for dense stages)
    pub channels: usize,
    pub kernel: usize,
    pub stride: usize,
}

impl StageSpec {
    pub fn downscale(channels: usize) -> Self {
        Self {
            kind: StageKind::Downscale,
            channels,
            kernel: DOWNSCALE_KERNEL,
            stride: 2,
        }
    }

    pub fn upscale(channels: usize) -> Self {
        Self {
            kind: StageKind::Upscale,
            channels,
            kernel: UPSCALE_KERNEL,
            stride: 1,
        }
    }

    pub fn flatten() -> Self {
        Self {
            kind: StageKind::Flatten,
            channels: 0,
            kernel: 0,
            stride: 1,
        }
    }

    pub fn dense(units: usize) -> Self {
        Self {
            kind: StageKind::Dense,
            channels: units,
            kernel: 0,
            stride: 1,
        }
    }

    pub fn reshape(channels: usize, side: usize) -> Self {
        Self {
            kind: StageKind::Reshape { side },
            channels,
            kernel: 0,
            stride: 1,
        }
    }

    pub fn head(channels: usize) -> Self {
        Self {
            kind: StageKind::Head,
            channels,
            kernel: HEAD_KERNEL,
            stride: 1,
        }
    }

    /// Shape produced from `input`, or an error if the stage cannot accept it.
    pub fn output_shape(&self, input: FeatureShape) -> faceswap_core::Result<FeatureShape> {
        let reject = || {
            Err(Error::InvalidInput(format!(
                "{:?} stage cannot consume {:?}",
                self.kind, input
            )))
        };

        match (self.kind, input) {
            (
                StageKind::Downscale,
                FeatureShape::Spatial { height, width, .. },
            ) => {
                if height % self.stride != 0 || width % self.stride != 0 {
                    return reject();
                }
                Ok(FeatureShape::Spatial {
                    channels: self.channels,
                    height: height / self.stride,
                    width: width / self.stride,
                })
            }
            (StageKind::Upscale, FeatureShape::Spatial { height, width, .. }) => {
                Ok(FeatureShape::Spatial {
                    channels: self.channels,
                    height: height * 2,
                    width: width * 2,
                })
            }
            (StageKind::Head, FeatureShape::Spatial { height, width, .. }) => {
                Ok(FeatureShape::Spatial {
                    channels: self.channels,
                    height,
                    width,
                })
            }
            (StageKind::Flatten, shape @ FeatureShape::Spatial { .. }) => {
                Ok(FeatureShape::Flat(shape.len()))
            }
            (StageKind::Dense, FeatureShape::Flat(_)) => Ok(FeatureShape::Flat(self.channels)),
            (StageKind::Reshape { side }, FeatureShape::Flat(n)) => {
                if n != self.channels * side * side {
                    return reject();
                }
                Ok(FeatureShape::image(self.channels, side))
            }
            _ => reject(),
        }
    }
}

/// Ordered description of a single-input, single-output network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub input: FeatureShape,
    pub stages: Vec<StageSpec>,
}

impl NetworkSpec {
    pub fn output_shape(&self) -> faceswap_core::Result<FeatureShape> {
        self.stages
            .iter()
            .try_fold(self.input, |shape, stage| stage.output_shape(shape))
    }
}

/// Two branches reading the same latent input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderSpec {
    pub color: NetworkSpec,
    pub mask: NetworkSpec,
}

enum Stage {
    Downscale(Conv2d),
    Upscale(Conv2d),
    Flatten,
    Dense(Linear),
    Reshape { channels: usize, side: usize },
    Head(Conv2d),
}

impl Stage {
    fn build(spec: &StageSpec, input: FeatureShape, vb: VarBuilder) -> faceswap_core::Result<Self> {
        let in_channels = match input {
            FeatureShape::Spatial { channels, .. } => channels,
            FeatureShape::Flat(n) => n,
        };
        let conv_config = Conv2dConfig {
            padding: spec.kernel / 2,
            stride: spec.stride,
            ..Default::default()
        };

        let stage = match spec.kind {
            StageKind::Downscale => Stage::Downscale(conv2d(
                in_channels,
                spec.channels,
                spec.kernel,
                conv_config,
                vb.pp("conv"),
            )?),
            StageKind::Upscale => Stage::Upscale(conv2d(
                in_channels,
                spec.channels,
                spec.kernel,
                conv_config,
                vb.pp("conv"),
            )?),
            StageKind::Head => Stage::Head(conv2d(
                in_channels,
                spec.channels,
                spec.kernel,
                conv_config,
                vb.pp("conv"),
            )?),
            StageKind::Flatten => Stage::Flatten,
            StageKind::Dense => Stage::Dense(linear(in_channels, spec.channels, vb.pp("dense"))?),
            StageKind::Reshape { side } => Stage::Reshape {
                channels: spec.channels,
                side,
            },
        };

        Ok(stage)
    }
}

impl Module for Stage {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Stage::Downscale(conv) => ops::leaky_relu(&conv.forward(x)?, LEAKY_RELU_SLOPE),
            Stage::Upscale(conv) => {
                let (_b, _c, h, w) = x.dims4()?;
                let x = x.upsample_nearest2d(h * 2, w * 2)?;
                ops::leaky_relu(&conv.forward(&x)?, LEAKY_RELU_SLOPE)
            }
            Stage::Flatten => x.flatten_from(1),
            Stage::Dense(dense) => dense.forward(x),
            Stage::Reshape { channels, side } => {
                let batch = x.dim(0)?;
                x.reshape((batch, *channels, *side, *side))
            }
            Stage::Head(conv) => ops::sigmoid(&conv.forward(x)?),
        }
    }
}

/// Generic executor for a [`NetworkSpec`]
pub struct StageStack {
    stages: Vec<Stage>,
    spec: NetworkSpec,
}

impl StageStack {
    pub fn build(spec: &NetworkSpec, vb: VarBuilder) -> faceswap_core::Result<Self> {
        let mut stages = Vec::with_capacity(spec.stages.len());
        let mut shape = spec.input;

        for (i, stage) in spec.stages.iter().enumerate() {
            stages.push(Stage::build(stage, shape, vb.pp(format!("stage_{i}")))?);
            shape = stage.output_shape(shape)?;
        }

        Ok(Self {
            stages,
            spec: spec.clone(),
        })
    }

    pub fn spec(&self) -> &NetworkSpec {
        &self.spec
    }
}

impl Module for StageStack {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.stages
            .iter()
            .try_fold(x.clone(), |x, stage| stage.forward(&x))
    }
}

/// Image to latent spatial map
pub struct Encoder {
    stack: StageStack,
}

impl Encoder {
    /// # Arguments
    /// * `image` - NCHW tensor [batch, 3, R, R]
    ///
    /// # Returns
    /// Latent map [batch, L, R/8, R/8]
    pub fn forward(&self, image: &Tensor) -> Result<Tensor> {
        self.stack.forward(image)
    }

    pub fn spec(&self) -> &NetworkSpec {
        self.stack.spec()
    }
}

/// Latent spatial map to (color, mask)
pub struct Decoder {
    color: StageStack,
    mask: StageStack,
}

impl Decoder {
    /// Returns `(color [batch, 3, R, R], mask [batch, 1, R, R])`, both in [0, 1].
    pub fn forward(&self, latent: &Tensor) -> Result<(Tensor, Tensor)> {
        let color = self.color.forward(latent)?;
        let mask = self.mask.forward(latent)?;
        Ok((color, mask))
    }
}

/// Materializes the networks of one profile.
#[derive(Debug, Clone)]
pub struct ArchitectureBuilder {
    profile: ArchitectureProfile,
}

impl ArchitectureBuilder {
    pub fn new(profile: ArchitectureProfile) -> faceswap_core::Result<Self> {
        profile.validate()?;
        Ok(Self { profile })
    }

    pub fn for_tier(tier: Tier) -> faceswap_core::Result<Self> {
        Self::new(ArchitectureProfile::for_tier(tier))
    }

    pub fn profile(&self) -> &ArchitectureProfile {
        &self.profile
    }

    /// Create encoder variables inside `params` and return the network.
    pub fn encoder(&self, ctx: &BuildContext, params: &VarMap) -> faceswap_core::Result<Encoder> {
        let spec = self.profile.encoder_spec();
        let stack = StageStack::build(&spec, ctx.var_builder(params))?;
        Ok(Encoder { stack })
    }

    /// Create decoder variables inside `params` and return the network.
    pub fn decoder(&self, ctx: &BuildContext, params: &VarMap) -> faceswap_core::Result<Decoder> {
        let spec = self.profile.decoder_spec();
        let vb = ctx.var_builder(params);
        let color = StageStack::build(&spec.color, vb.pp("x"))?;
        let mask = StageStack::build(&spec.mask, vb.pp("y"))?;
        Ok(Decoder { color, mask })
    }
}
