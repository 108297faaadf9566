use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Body of an upload.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Errors from storage providers.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    Backend(String),

    #[error("object not found: {0}")]
    NotFound(String),
}

/// Object storage the engine persists artifacts into.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Store `body` under `key` and return a signed, time-limited URL.
    ///
    /// `size` is the announced length when known; providers must not rely
    /// on it being exact.
    async fn upload_stream(
        &self,
        body: ByteStream,
        key: &str,
        size: Option<u64>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// Reject keys that are empty, absolute, or climb out of the namespace.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
