//! S3-compatible object storage with presigned GET URLs.

use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as S3Body;
use futures::StreamExt;

use crate::provider::{validate_key, ByteStream, StorageError, StorageProvider};

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Custom endpoint, e.g. `http://127.0.0.1:9000` for MinIO. `None`
    /// targets AWS.
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub url_ttl: Duration,
}

pub struct S3StorageProvider {
    client: aws_sdk_s3::Client,
    bucket: String,
    url_ttl: Duration,
}

impl S3StorageProvider {
    pub fn new(settings: S3Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key,
            settings.secret_key,
            None,
            None,
            "storyreel-static",
        );
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region))
            .credentials_provider(credentials)
            .force_path_style(true);
        if let Some(endpoint) = settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: settings.bucket,
            url_ttl: settings.url_ttl,
        }
    }

    /// Presigned GET URL for `key`.
    pub async fn presigned_url(&self, key: &str) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(self.url_ttl)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Backend(DisplayErrorContext(&e).to_string()))?;
        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl StorageProvider for S3StorageProvider {
    async fn upload_stream(
        &self,
        mut body: ByteStream,
        key: &str,
        size: Option<u64>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_key(key)?;

        // PutObject needs a sized body; buffer the artifact.
        let mut buf = Vec::with_capacity(size.unwrap_or(0) as usize);
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let len = buf.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(S3Body::from(buf))
            .send()
            .await
            .map_err(|e| StorageError::Backend(DisplayErrorContext(&e).to_string()))?;

        tracing::debug!(bucket = %self.bucket, key, bytes = len, "Stored object in S3");
        self.presigned_url(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> S3StorageProvider {
        S3StorageProvider::new(S3Settings {
            endpoint: Some("http://127.0.0.1:9000".into()),
            bucket: "storyreel".into(),
            region: "us-east-1".into(),
            access_key: "minio".into(),
            secret_key: "minio-secret".into(),
            url_ttl: Duration::from_secs(72 * 3600),
        })
    }

    #[tokio::test]
    async fn presigned_url_is_path_style_with_expiry() {
        let url = provider().presigned_url("shots/s1/image.png").await.unwrap();
        assert!(url.starts_with("http://127.0.0.1:9000/storyreel/shots/s1/image.png?"));
        assert!(url.contains("X-Amz-Expires=259200"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn invalid_key_is_rejected_before_upload() {
        let body = futures::stream::empty().boxed();
        let err = provider()
            .upload_stream(body, "../escape", None, "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
