//! Filesystem store for uploaded artefacts. Keys follow
//! `<yyyy>/<mm>/<uuid>-<sanitized_filename>` under the configured root.

use std::path::{Path, PathBuf};

use pricebot_core::{Error, Result};

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Writes the artefact, creating intermediate directories. The key comes
    /// from `storage_key` and is already sanitized.
    pub async fn write(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Error::storage)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(Error::storage)?;
        Ok(path)
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.path_for(key))
            .await
            .map_err(Error::storage)
    }

    /// Best-effort removal, used when a document row has to be rolled back
    /// after a storage failure.
    pub async fn remove(&self, key: &str) {
        let _ = tokio::fs::remove_file(self.path_for(key)).await;
    }
}
