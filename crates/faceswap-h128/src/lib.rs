//! # Faceswap-H128
//!
//! Shared-encoder, dual-decoder face autoencoder at 128×128.
//!
//! One encoder maps an aligned face crop to a 16×16 latent map; two
//! decoders, one per identity (src, dst), reconstruct a color image and a
//! foreground mask from it. Swapping is `decoder_src(encoder(dst_face))`.
//!
//! ## Architecture Overview
//!
//! 1. **Tier selection**: accelerator capacity picks the channel profile
//!    and the batch-size bound
//! 2. **Encoder**: four strided 5×5 downscales, a dense bottleneck and one
//!    upscale back to 16×16
//! 3. **Decoders**: a color branch and a mask branch, three upscales each,
//!    sigmoid heads
//! 4. **Joint graph**: both domains share the encoder; the four outputs are
//!    trained together with one optimizer update per step
//!
//! Loss: L = DSSIM_mask(src) + MAE(src mask) + DSSIM_mask(dst) + MAE(dst mask)

pub mod architecture;
pub mod checkpoint;
pub mod converter;
pub mod loss;
pub mod model;
pub mod preview;
pub mod samples;
pub mod tier;
pub mod trainer;

pub use architecture::{ArchitectureBuilder, ArchitectureProfile, BuildContext, Decoder, Encoder};
pub use checkpoint::{Artifact, CheckpointState, CheckpointStore};
pub use converter::*;
pub use loss::{LossComposer, MaskedDssim, SsimConfig, StepLosses};
pub use model::*;
pub use preview::*;
pub use samples::*;
pub use tier::{Tier, TierSelection};
pub use trainer::*;
