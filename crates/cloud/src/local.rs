//! Filesystem storage with HMAC-signed, expiring URLs.
//!
//! URLs have the form `{public_url}/{key}?expires={unix}&signature={hex}`
//! where the signature is HMAC-SHA256 over `"{key}\n{expires}"`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::AsyncWriteExt;

use crate::provider::{validate_key, ByteStream, StorageError, StorageProvider};

type HmacSha256 = Hmac<Sha256>;

/// Stores objects as files below `root`.
pub struct LocalStorageProvider {
    root: PathBuf,
    public_url: String,
    secret: String,
    url_ttl: Duration,
}

impl LocalStorageProvider {
    pub fn new(
        root: impl Into<PathBuf>,
        public_url: impl Into<String>,
        secret: impl Into<String>,
        url_ttl: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            url_ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of an object.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Signed URL for `key`, valid for the configured TTL from `now`.
    pub fn signed_url(&self, key: &str, now: DateTime<Utc>) -> String {
        let expires = now.timestamp() + self.url_ttl.as_secs() as i64;
        format!(
            "{}/{}?expires={}&signature={}",
            self.public_url,
            key,
            expires,
            self.sign(key, expires)
        )
    }

    /// Check a signature produced by [`signed_url`](Self::signed_url).
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let Some(sig) = hex::decode(signature) else {
            return false;
        };
        self.mac(key, expires).verify_slice(&sig).is_ok()
    }

    /// Open a stored object for reading.
    pub async fn open(&self, key: &str) -> Result<tokio::fs::File, StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::Io(e),
        })
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        format!("{:x}", self.mac(key, expires).finalize().into_bytes())
    }

    fn mac(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    async fn upload_stream(
        &self,
        mut body: ByteStream,
        key: &str,
        size: Option<u64>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write beside the target and rename so readers never see a partial file.
        let partial = path.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(StorageError::Io(e));
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &path).await?;

        if let Some(expected) = size.filter(|s| *s != written) {
            tracing::warn!(key, expected, written, "Stored object size differs from announced size");
        }
        tracing::debug!(key, bytes = written, "Stored object on local filesystem");

        Ok(self.signed_url(key, Utc::now()))
    }
}

// ---------------------------------------------------------------------------
// hex decoding helper (no extra dep)
// ---------------------------------------------------------------------------

mod hex {
    /// Decode a lowercase or uppercase hex string.
    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
            .collect()
    }
}
