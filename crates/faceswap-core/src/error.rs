//! Error types for the face-swap model.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Training step produced a non-finite loss ({total})")]
    NonFiniteLoss { total: f32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn shape_mismatch(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        Error::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Errors produced while loading or validating a [`ModelConfig`].
///
/// [`ModelConfig`]: crate::config::ModelConfig
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Cannot load configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures of the three-artifact parameter store.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint set in {dir:?} is incomplete: missing {missing}")]
    Incomplete { dir: PathBuf, missing: String },

    #[error("Cannot load {artifact} from {path:?}: {source}")]
    Load {
        artifact: &'static str,
        path: PathBuf,
        #[source]
        source: candle_core::Error,
    },

    #[error("Cannot save {artifact} to {path:?}: {source}")]
    Save {
        artifact: &'static str,
        path: PathBuf,
        #[source]
        source: candle_core::Error,
    },

    #[error("Cannot commit checkpoint file {path:?}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
