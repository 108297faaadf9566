//! In-memory storage provider.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::provider::{validate_key, ByteStream, StorageError, StorageProvider};

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Keeps uploaded objects in a map. URLs are `memory://{key}`.
#[derive(Default)]
pub struct MemoryStorageProvider {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    async fn upload_stream(
        &self,
        mut body: ByteStream,
        key: &str,
        _size: Option<u64>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_key(key)?;
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("memory://{key}"))
    }
}
