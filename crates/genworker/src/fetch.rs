//! Download of finished artifacts from worker-reported URLs.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};

/// A byte stream of an artifact body.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("download request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("download returned status {0}")]
    Status(u16),

    #[error("download stream failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A downloaded artifact whose body has not been read yet.
pub struct Artifact {
    pub body: ByteStream,
    /// Content length, when the source announced one.
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

impl Artifact {
    /// Wrap an in-memory body.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self {
            body: futures::stream::once(async move { Ok(bytes) }).boxed(),
            size: Some(size),
            content_type: None,
        }
    }

    /// Read the whole body into memory.
    pub async fn into_bytes(self) -> Result<Vec<u8>, FetchError> {
        let mut out = Vec::with_capacity(self.size.unwrap_or(0) as usize);
        let mut body = self.body;
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

/// Fetches artifact bodies by URL.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// GET `url`. Anything but `200 OK` is an error.
    async fn fetch(&self, url: &str) -> Result<Artifact, FetchError>;
}

/// [`ArtifactFetcher`] over plain HTTP.
#[derive(Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Artifact, FetchError> {
        let response = self.client.get(url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let size = response.content_length();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();

        Ok(Artifact {
            body,
            size,
            content_type,
        })
    }
}
