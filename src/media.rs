// src/media.rs
//! Object storage for poll media.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Stores `bytes` under `path` and returns the stored path.
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, MediaError>;

    fn public_url(&self, path: &str) -> String;
}

/// `{poll_id}/{random}.{ext}`, the extension taken from the uploaded file name.
pub fn storage_path(poll_id: Uuid, file_name: &str) -> String {
    let ext = file_name.rsplit('.').next().unwrap_or(file_name);
    format!("{poll_id}/{}.{ext}", Uuid::new_v4())
}

/// Files on local disk, served back under `{base_url}/media/`.
pub struct LocalMediaStorage {
    root: PathBuf,
    base_url: String,
}

impl LocalMediaStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, MediaError> {
        let relative = Path::new(path);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !clean {
            return Err(MediaError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl MediaStorage for LocalMediaStorage {
    async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String, MediaError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, bytes).await?;
        debug!(path, size = bytes.len(), "stored media file");
        Ok(path.to_string())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/media/{path}", self.base_url)
    }
}
