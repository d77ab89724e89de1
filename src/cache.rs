use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::models::LoanRecord;
use crate::pd_model::{PdModel, PdModelConfig};

pub fn dataset_key(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    Ok(sha256_hex(&bytes))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct ModelCache {
    dir: PathBuf,
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("pd_model_{key}.json"))
    }

    /// A corrupt entry is reported as a miss.
    pub fn load(&self, key: &str) -> anyhow::Result<Option<PdModel>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match serde_json::from_str::<PdModel>(&raw) {
            Ok(model) if model.is_consistent() => Ok(Some(model)),
            Ok(_) => {
                warn!(path = %path.display(), "ignoring model cache entry with mismatched shape");
                Ok(None)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring corrupt model cache entry");
                Ok(None)
            }
        }
    }

    pub fn store(&self, key: &str, model: &PdModel) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.entry_path(key);
        std::fs::write(&path, serde_json::to_string(model)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "model cached");
        Ok(())
    }

    pub fn invalidate(&self, key: &str) -> anyhow::Result<bool> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
        Ok(true)
    }

    pub fn clear(&self) -> anyhow::Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0usize;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("pd_model_") && name.ends_with(".json") {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        info!(removed, "model cache cleared");
        Ok(removed)
    }

    pub fn get_or_fit(
        &self,
        key: &str,
        loans: &[LoanRecord],
        config: &PdModelConfig,
    ) -> anyhow::Result<PdModel> {
        if let Some(model) = self.load(key)? {
            debug!(key, "model cache hit");
            return Ok(model);
        }
        let model = PdModel::fit(loans, config)?;
        self.store(key, &model)?;
        Ok(model)
    }
}
