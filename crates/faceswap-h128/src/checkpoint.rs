//! Three-artifact parameter store.
//!
//! Encoder, src decoder and dst decoder are persisted as independent
//! safetensors files in one directory. A set is either absent (first run),
//! complete, or broken; only the first two are acceptable at load time.

use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use tracing::{info, warn};

use faceswap_core::{CheckpointError, Result};

/// One of the three persisted parameter sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Encoder,
    DecoderSrc,
    DecoderDst,
}

impl Artifact {
    pub const ALL: [Artifact; 3] = [Artifact::Encoder, Artifact::DecoderSrc, Artifact::DecoderDst];

    pub fn as_str(&self) -> &'static str {
        match self {
            Artifact::Encoder => "encoder",
            Artifact::DecoderSrc => "decoder_src",
            Artifact::DecoderDst => "decoder_dst",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.safetensors", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointState {
    /// No artifact exists yet
    Absent,
    Complete,
    /// Some artifacts exist, the listed ones do not
    Partial { missing: Vec<Artifact> },
}

/// Parameter sets addressable by artifact
pub trait ParameterSets {
    fn params(&self, artifact: Artifact) -> &VarMap;

    fn params_mut(&mut self, artifact: Artifact) -> &mut VarMap;
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    fn staging_path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(format!("{}.tmp", artifact.file_name()))
    }

    pub fn state(&self) -> CheckpointState {
        let missing: Vec<Artifact> = Artifact::ALL
            .into_iter()
            .filter(|a| !self.path(*a).is_file())
            .collect();

        match missing.len() {
            0 => CheckpointState::Complete,
            n if n == Artifact::ALL.len() => CheckpointState::Absent,
            _ => CheckpointState::Partial { missing },
        }
    }

    /// Overwrite the variables in `sets` with the stored values.
    ///
    /// Every variable already registered in a set must be present in its
    /// artifact with the same shape.
    pub fn load<S: ParameterSets>(&self, sets: &mut S) -> Result<()> {
        if let CheckpointState::Partial { missing } = self.state() {
            let missing = missing.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(", ");
            return Err(CheckpointError::Incomplete {
                dir: self.dir.clone(),
                missing,
            }
            .into());
        }

        for artifact in Artifact::ALL {
            let path = self.path(artifact);
            sets.params_mut(artifact)
                .load(&path)
                .map_err(|source| CheckpointError::Load {
                    artifact: artifact.as_str(),
                    path: path.clone(),
                    source,
                })?;
        }

        info!(dir = %self.dir.display(), "loaded checkpoint");
        Ok(())
    }

    /// Write all three artifacts.
    ///
    /// Each file is staged next to its destination and the set is only
    /// renamed into place once every artifact serialized successfully.
    /// The renames themselves run one after another: if one fails partway,
    /// the directory holds a mix of new and old artifacts and the error is
    /// returned as [`CheckpointError::Commit`].
    pub fn save<S: ParameterSets>(&self, sets: &S) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        for artifact in Artifact::ALL {
            let staging = self.staging_path(artifact);
            if let Err(source) = sets.params(artifact).save(&staging) {
                self.discard_staged();
                return Err(CheckpointError::Save {
                    artifact: artifact.as_str(),
                    path: staging,
                    source,
                }
                .into());
            }
        }

        for artifact in Artifact::ALL {
            let path = self.path(artifact);
            std::fs::rename(self.staging_path(artifact), &path)
                .map_err(|source| CheckpointError::Commit { path, source })?;
        }

        info!(dir = %self.dir.display(), "saved checkpoint");
        Ok(())
    }

    fn discard_staged(&self) {
        for artifact in Artifact::ALL {
            let staging = self.staging_path(artifact);
            if staging.exists() {
                if let Err(e) = std::fs::remove_file(&staging) {
                    warn!(path = %staging.display(), "cannot remove staged artifact: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{Init, VarBuilder};

    struct Sets([VarMap; 3]);

    impl Sets {
        fn new() -> candle_core::Result<Self> {
            let sets = Self([VarMap::new(), VarMap::new(), VarMap::new()]);
            for (i, params) in sets.0.iter().enumerate() {
                params.get((2, 3), "w", Init::Const(i as f64), DType::F32, &Device::Cpu)?;
            }
            Ok(sets)
        }

        fn value(&self, artifact: Artifact) -> candle_core::Result<Vec<f32>> {
            let vb = VarBuilder::from_varmap(self.params(artifact), DType::F32, &Device::Cpu);
            vb.get((2, 3), "w")?.flatten_all()?.to_vec1()
        }
    }

    impl ParameterSets for Sets {
        fn params(&self, artifact: Artifact) -> &VarMap {
            &self.0[artifact as usize]
        }

        fn params_mut(&mut self, artifact: Artifact) -> &mut VarMap {
            &mut self.0[artifact as usize]
        }
    }

    #[test]
    fn test_state_transitions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::new(dir.path().join("model"));
        assert_eq!(store.state(), CheckpointState::Absent);

        store.save(&Sets::new()?)?;
        assert_eq!(store.state(), CheckpointState::Complete);

        std::fs::remove_file(store.path(Artifact::DecoderDst))?;
        assert_eq!(
            store.state(),
            CheckpointState::Partial {
                missing: vec![Artifact::DecoderDst]
            }
        );
        Ok(())
    }

    #[test]
    fn test_save_then_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::new(dir.path());
        let saved = Sets::new()?;
        store.save(&saved)?;

        let mut loaded = Sets::new()?;
        for params in loaded.0.iter_mut() {
            params.set_one("w", Tensor::full(9f32, (2, 3), &Device::Cpu)?)?;
        }
        store.load(&mut loaded)?;

        for artifact in Artifact::ALL {
            assert_eq!(loaded.value(artifact)?, saved.value(artifact)?);
        }
        assert!(!dir.path().join("encoder.safetensors.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_partial_set_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::new(dir.path());
        store.save(&Sets::new()?)?;
        std::fs::remove_file(store.path(Artifact::Encoder))?;

        let err = store.load(&mut Sets::new()?).unwrap_err();
        assert!(matches!(
            err,
            faceswap_core::Error::Checkpoint(CheckpointError::Incomplete { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_corrupt_artifact_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::new(dir.path());
        store.save(&Sets::new()?)?;
        std::fs::write(store.path(Artifact::DecoderSrc), b"not a safetensors file")?;

        let err = store.load(&mut Sets::new()?).unwrap_err();
        assert!(matches!(
            err,
            faceswap_core::Error::Checkpoint(CheckpointError::Load {
                artifact: "decoder_src",
                ..
            })
        ));
        Ok(())
    }
}
