use std::sync::Arc;

use storyreel_cloud::LocalStorageProvider;
use storyreel_pipeline::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Orchestrator>,
    pub config: Arc<ServerConfig>,
    /// Set when artifacts live on the local filesystem and `/files` serves
    /// them.
    pub local_storage: Option<Arc<LocalStorageProvider>>,
}
