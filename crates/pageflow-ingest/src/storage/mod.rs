//! Artifact upload destinations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

pub mod config;
pub mod s3;

pub use config::StorageConfig;
pub use s3::S3BlobStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to upload {key}: {message}")]
    Upload { key: String, message: String },

    #[error("storage configuration error: {0}")]
    Config(String),
}

/// Durable destination for a closed artifact
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the file at `local_path` under `key`, returning its URI
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String, StorageError>;
}

/// `<prefix>/<YYYY-MM-DD>/run-<YYYYMMDD_HHMMSS>.<ext>`
pub fn destination_key(prefix: &str, at: DateTime<Utc>, extension: &str) -> String {
    let name = format!(
        "{}/run-{}.{}",
        at.format("%Y-%m-%d"),
        at.format("%Y%m%d_%H%M%S"),
        extension
    );

    match prefix.trim_matches('/') {
        "" => name,
        prefix => format!("{}/{}", prefix, name),
    }
}

/// Directory part of an object key, e.g. `raw/customers` for
/// `raw/customers/export.csv`
pub fn prefix_from_key(key: &str) -> &str {
    key.trim_start_matches('/')
        .rsplit_once('/')
        .map_or("", |(dir, _)| dir)
}

/// Copies artifacts into a local directory tree
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    #[instrument(skip(self))]
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        let destination = self.root.join(key);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Copying {} to {}", local_path.display(), destination.display());
        let bytes = tokio::fs::copy(local_path, &destination).await?;

        let absolute = tokio::fs::canonicalize(&destination).await?;
        info!(bytes, "Stored artifact at {}", absolute.display());
        Ok(format!("file://{}", absolute.display()))
    }
}
