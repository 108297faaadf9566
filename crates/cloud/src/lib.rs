//! Durable storage for generated artifacts.
//!
//! [`StorageProvider`] is the one operation the engine needs: stream bytes
//! under an object key and get back a time-limited URL. Three providers:
//!
//! - [`LocalStorageProvider`]: files under a root directory, URLs signed
//!   with HMAC-SHA256 and served by the API's `/files` route.
//! - [`S3StorageProvider`]: any S3-compatible store (MinIO in development),
//!   URLs presigned by the SDK.
//! - [`MemoryStorageProvider`]: keeps objects in a map, for tests.

pub mod config;
pub mod local;
pub mod memory;
pub mod provider;
pub mod s3;

pub use config::{Storage, StorageBackend, StorageConfig};
pub use local::LocalStorageProvider;
pub use memory::MemoryStorageProvider;
pub use provider::{ByteStream, StorageError, StorageProvider};
pub use s3::S3StorageProvider;
