//! Model configuration.
//!
//! [`ModelConfig`] collects everything supplied at model-construction time:
//! where checkpoints live, the accelerator capacity that drives tier
//! selection, the device, and the optimizer hyper-parameters. It can be
//! layered from a config file and `FACESWAP_`-prefixed environment
//! variables, or stored as JSON next to the checkpoints.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{DeviceType, Platform};

/// Environment prefix consulted by [`ModelConfig::from_file`] and [`ModelConfig::from_env`]
pub const ENV_PREFIX: &str = "FACESWAP";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding the three checkpoint artifacts
    pub model_dir: PathBuf,

    /// Available accelerator memory in GB
    pub capacity_gb: f64,

    /// Accelerator flavor the capacity was measured on
    pub platform: Platform,

    /// Requested batch size; capped at the capacity table bound
    pub batch_size: Option<usize>,

    /// Device to build the networks on
    pub device: DeviceType,

    /// Optimizer hyper-parameters
    pub optimizer: OptimizerConfig,

    /// Samples per domain shown in a preview grid
    pub preview_samples: usize,

    /// Caller-side defaults for the converter mask modifiers
    pub converter: ConverterOverrides,
}

/// Adam settings for the joint update
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 5e-5,
            beta1: 0.5,
            beta2: 0.999,
            eps: 1e-7,
        }
    }
}

/// Mask post-processing values as supplied by the caller, before any model bias
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterOverrides {
    pub erode_mask_modifier: Option<i32>,
    pub blur_mask_modifier: Option<i32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("model"),
            capacity_gb: 4.0,
            platform: Platform::Accelerator,
            batch_size: None,
            device: DeviceType::Cpu,
            optimizer: OptimizerConfig::default(),
            preview_samples: 4,
            converter: ConverterOverrides::default(),
        }
    }
}

/// `FACESWAP_CAPACITY_GB`, `FACESWAP_OPTIMIZER__LEARNING_RATE`, ...
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl ModelConfig {
    /// Load configuration from a file, with environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = config::Config::builder().add_source(config::File::from(path.as_ref()));
        Self::build(builder, environment())
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(config::Config::builder(), environment())
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        env: config::Environment,
    ) -> Result<Self, ConfigError> {
        let cfg: Self = builder.add_source(env).build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read a JSON config written by [`ModelConfig::to_json`]
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json(&self, path: &Path) -> crate::Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Out-of-table capacities clamp to the nearest bracket at selection time
        if self.capacity_gb.is_nan() {
            return Err(ConfigError::invalid_value("capacity_gb", "must be a number, got NaN"));
        }
        if self.batch_size == Some(0) {
            return Err(ConfigError::invalid_value("batch_size", "must be at least 1"));
        }
        let opt = &self.optimizer;
        if !(opt.learning_rate > 0.0) {
            return Err(ConfigError::invalid_value(
                "optimizer.learning_rate",
                format!("must be positive, got {}", opt.learning_rate),
            ));
        }
        for (field, beta) in [("optimizer.beta1", opt.beta1), ("optimizer.beta2", opt.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(ConfigError::invalid_value(
                    field,
                    format!("must be in [0, 1), got {beta}"),
                ));
            }
        }
        if !(opt.eps > 0.0) {
            return Err(ConfigError::invalid_value("optimizer.eps", "must be positive"));
        }
        if self.preview_samples == 0 {
            return Err(ConfigError::invalid_value("preview_samples", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.optimizer.learning_rate, 5e-5);
        assert_eq!(config.optimizer.beta1, 0.5);
        assert_eq!(config.preview_samples, 4);
        assert_eq!(config.converter.erode_mask_modifier, None);
    }

    #[test]
    fn test_rejects_bad_beta() {
        let mut config = ModelConfig::default();
        config.optimizer.beta2 = 1.0;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "optimizer.beta2"),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_table_capacity_is_accepted() {
        for capacity_gb in [-1.0, 0.0, 64.0, f64::INFINITY, f64::NEG_INFINITY] {
            let config = ModelConfig {
                capacity_gb,
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "capacity {capacity_gb}");
        }

        let config = ModelConfig {
            capacity_gb: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_use_single_underscore_prefix() {
        let mut vars = config::Map::new();
        vars.insert("FACESWAP_CAPACITY_GB".to_string(), "9".to_string());
        vars.insert("FACESWAP_PLATFORM".to_string(), "cpu_only".to_string());
        vars.insert("FACESWAP_OPTIMIZER__BETA1".to_string(), "0.6".to_string());

        let env = environment().source(Some(vars));
        let loaded = ModelConfig::build(config::Config::builder(), env).unwrap();
        assert_eq!(loaded.capacity_gb, 9.0);
        assert_eq!(loaded.platform, Platform::CpuOnly);
        assert_eq!(loaded.optimizer.beta1, 0.6);
        assert_eq!(loaded.optimizer.beta2, 0.999);
    }

    #[test]
    fn test_rejects_zero_batch() {
        let config = ModelConfig {
            batch_size: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let config = ModelConfig {
            capacity_gb: 8.0,
            platform: Platform::CpuOnly,
            batch_size: Some(6),
            converter: ConverterOverrides {
                erode_mask_modifier: Some(5),
                blur_mask_modifier: None,
            },
            ..Default::default()
        };
        config.to_json(&path).unwrap();

        let loaded = ModelConfig::from_json(&path).unwrap();
        assert_eq!(loaded.capacity_gb, 8.0);
        assert_eq!(loaded.platform, Platform::CpuOnly);
        assert_eq!(loaded.batch_size, Some(6));
        assert_eq!(loaded.converter.erode_mask_modifier, Some(5));
    }

    #[test]
    fn test_from_file_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.toml");
        std::fs::write(
            &path,
            "capacity_gb = 6.0\nplatform = \"cpu_only\"\n\n[optimizer]\nlearning_rate = 0.0001\n",
        )
        .unwrap();

        let loaded = ModelConfig::from_file(&path).unwrap();
        assert_eq!(loaded.capacity_gb, 6.0);
        assert_eq!(loaded.platform, Platform::CpuOnly);
        assert_eq!(loaded.optimizer.learning_rate, 1e-4);
        assert_eq!(loaded.optimizer.beta1, 0.5);
    }
}
