use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Directory of independently named WAV files, served statically under
/// `/audio`. Existence is defined solely by filesystem presence; nothing is
/// ever deleted here, so any retention policy has to be layered on top of
/// this interface.
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `bytes` under a freshly generated identifier and return the
    /// file name.
    pub async fn put(&self, bytes: &[u8]) -> io::Result<String> {
        let file_name = format!("{}.wav", Uuid::new_v4());
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(&file_name), bytes).await?;
        Ok(file_name)
    }

    /// Public path the asset is served at.
    pub fn resolve(&self, file_name: &str) -> String {
        format!("/audio/{file_name}")
    }
}
