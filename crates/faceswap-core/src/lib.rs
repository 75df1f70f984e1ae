//! # Faceswap-Core
//!
//! Shared types, error hierarchy and configuration for the H128
//! shared-encoder / dual-decoder face-swap model.

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::{CheckpointError, ConfigError, Error, Result};
pub use types::*;
