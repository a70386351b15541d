//! Versioned persistence for trained predictors.
//!
//! Every model owns a namespace directory containing its opaque artifact
//! and a metadata document. Registration is atomic: the artifact is written
//! first, then metadata lands via temp-file + rename. Metadata doubles as
//! the existence marker; a directory without readable metadata is treated
//! as not registered.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use common::{Error, ModelMetadata, Result};
use tracing::warn;
use uuid::Uuid;

const ARTIFACT_FILE: &str = "artifact.bin";
const METADATA_FILE: &str = "metadata.json";

/// Filesystem-backed model registry rooted at one directory.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn model_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Register a model. Overwrites any previous version of `name`.
    ///
    /// Returns the record id assigned to this registration.
    pub fn register(&self, artifact: &[u8], metadata: &ModelMetadata) -> Result<Uuid> {
        if metadata.name.is_empty() || metadata.name.contains(['/', '\\']) {
            return Err(Error::Model(format!(
                "invalid model name: {:?}",
                metadata.name
            )));
        }
        let dir = self.model_dir(&metadata.name);
        fs::create_dir_all(&dir)?;

        fs::write(dir.join(ARTIFACT_FILE), artifact)?;

        // Metadata last: written to a temp file, then renamed into place so
        // a reader never observes a half-written marker.
        let record_id = Uuid::new_v4();
        let json = serde_json::to_vec_pretty(metadata)?;
        let tmp = dir.join(format!(".{}.{}", METADATA_FILE, record_id));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, dir.join(METADATA_FILE))?;
        Ok(record_id)
    }

    /// Load a registered model.
    ///
    /// Missing artifact or unreadable metadata both surface as
    /// `ModelNotFound`; callers skip and log.
    pub fn load(&self, name: &str) -> Result<(Vec<u8>, ModelMetadata)> {
        let dir = self.model_dir(name);
        let metadata = self.read_metadata(&dir).ok_or_else(|| {
            Error::ModelNotFound(name.to_string())
        })?;
        let artifact = fs::read(dir.join(ARTIFACT_FILE))
            .map_err(|_| Error::ModelNotFound(name.to_string()))?;
        Ok((artifact, metadata))
    }

    fn read_metadata(&self, dir: &Path) -> Option<ModelMetadata> {
        let raw = fs::read(dir.join(METADATA_FILE)).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("unreadable model metadata in {}: {}", dir.display(), e);
                None
            }
        }
    }

    /// List every registered model's metadata, keyed by name.
    pub fn list(&self) -> Result<BTreeMap<String, ModelMetadata>> {
        let mut out = BTreeMap::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(meta) = self.read_metadata(&path) {
                out.insert(meta.name.clone(), meta);
            }
        }
        Ok(out)
    }

    /// Update the ensemble weight of a registered model.
    pub fn set_weight(&self, name: &str, weight: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(Error::Model(format!(
                "weight must be in [0, 1], got {}",
                weight
            )));
        }
        let dir = self.model_dir(name);
        let mut meta = self
            .read_metadata(&dir)
            .ok_or_else(|| Error::ModelNotFound(name.to_string()))?;
        meta.weight = weight;
        let json = serde_json::to_vec_pretty(&meta)?;
        let tmp = dir.join(format!(".{}.{}", METADATA_FILE, Uuid::new_v4()));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, dir.join(METADATA_FILE))?;
        Ok(())
    }

    /// Remove a model's namespace entirely.
    pub fn remove(&self, name: &str) -> Result<()> {
        let dir = self.model_dir(name);
        if dir.is_dir() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}
