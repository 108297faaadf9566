use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use storyreel_core::config::{env_opt, env_parse, env_required, env_string, ConfigError};

use crate::local::LocalStorageProvider;
use crate::provider::StorageProvider;
use crate::s3::{S3Settings, S3StorageProvider};

/// Default signed URL lifetime: 72 hours.
pub const DEFAULT_URL_TTL_SECS: u64 = 72 * 3600;

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Local {
        root: PathBuf,
        public_url: String,
        signing_secret: String,
    },
    S3(S3Settings),
}

/// A built provider. `local` is set for the filesystem backend, whose
/// objects the API serves and verifies itself.
#[derive(Clone)]
pub struct Storage {
    pub provider: Arc<dyn StorageProvider>,
    pub local: Option<Arc<LocalStorageProvider>>,
}

/// Storage configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url_ttl: Duration,
}

impl StorageConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                           |
    /// |--------------------------|-----------------------------------|
    /// | `STORAGE_BACKEND`        | `local` (`local` or `s3`)         |
    /// | `STORAGE_ROOT`           | `./data/storage`                  |
    /// | `STORAGE_PUBLIC_URL`     | `http://127.0.0.1:8080/files`     |
    /// | `STORAGE_SIGNING_SECRET` | random per process                |
    /// | `STORAGE_URL_TTL_SECS`   | `259200`                          |
    /// | `S3_ENDPOINT`            | unset (AWS)                       |
    /// | `S3_BUCKET`              | required for `s3`                 |
    /// | `S3_REGION`              | `us-east-1`                       |
    /// | `S3_ACCESS_KEY`          | required for `s3`                 |
    /// | `S3_SECRET_KEY`          | required for `s3`                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        let url_ttl = Duration::from_secs(env_parse(
            "STORAGE_URL_TTL_SECS",
            "u64",
            DEFAULT_URL_TTL_SECS,
        )?);

        let backend = match env_string("STORAGE_BACKEND", "local").as_str() {
            "local" => StorageBackend::Local {
                root: env_string("STORAGE_ROOT", "./data/storage").into(),
                public_url: env_string("STORAGE_PUBLIC_URL", "http://127.0.0.1:8080/files"),
                signing_secret: env_opt("STORAGE_SIGNING_SECRET").unwrap_or_else(|| {
                    tracing::warn!(
                        "STORAGE_SIGNING_SECRET not set; signed URLs will not survive a restart"
                    );
                    uuid::Uuid::new_v4().simple().to_string()
                }),
            },
            "s3" => StorageBackend::S3(S3Settings {
                endpoint: env_opt("S3_ENDPOINT"),
                bucket: env_required("S3_BUCKET")?,
                region: env_string("S3_REGION", "us-east-1"),
                access_key: env_required("S3_ACCESS_KEY")?,
                secret_key: env_required("S3_SECRET_KEY")?,
                url_ttl,
            }),
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    expected: "storage backend (local, s3)",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self { backend, url_ttl })
    }

    /// Local-filesystem configuration, mostly for tests.
    pub fn local(root: impl Into<PathBuf>, public_url: &str, secret: &str) -> Self {
        Self {
            backend: StorageBackend::Local {
                root: root.into(),
                public_url: public_url.to_string(),
                signing_secret: secret.to_string(),
            },
            url_ttl: Duration::from_secs(DEFAULT_URL_TTL_SECS),
        }
    }

    /// Build the configured provider.
    pub fn build(&self) -> Storage {
        match &self.backend {
            StorageBackend::Local {
                root,
                public_url,
                signing_secret,
            } => {
                let local = Arc::new(LocalStorageProvider::new(
                    root.clone(),
                    public_url.clone(),
                    signing_secret.clone(),
                    self.url_ttl,
                ));
                Storage {
                    provider: local.clone(),
                    local: Some(local),
                }
            }
            StorageBackend::S3(settings) => Storage {
                provider: Arc::new(S3StorageProvider::new(settings.clone())),
                local: None,
            },
        }
    }
}
