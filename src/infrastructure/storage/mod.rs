use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod s3;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("storage request for '{key}' failed: {reason}")]
    Request { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn request(key: &str, reason: impl ToString) -> Self {
        Self::Request {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Object store contract. Keys are bucket-relative; every write overwrites.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: Option<&str>) -> StorageResult<String>;

    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Stream the object to `path`, returning the number of bytes written.
    async fn save_locally(&self, key: &str, path: &Path) -> StorageResult<u64>;

    async fn upload_local_file(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<&str>,
    ) -> StorageResult<String>;
}

/// Content type for an uploaded artifact, by extension.
pub fn content_type_for(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl".to_string(),
        Some("ts") => "video/mp2t".to_string(),
        _ => mime_guess::from_path(path).first_or_octet_stream().to_string(),
    }
}
