use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// `postgres` or `memory`.
    pub store: &'static str,
    pub store_healthy: bool,
    /// Task ids waiting for a consumer.
    pub queued: usize,
    /// Task ids being handled right now.
    pub active: usize,
    /// Worker jobs being polled.
    pub jobs_in_flight: usize,
}

/// GET /health -- returns service, store and queue health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.engine.store();
    let store_healthy = match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Store health check failed");
            false
        }
    };
    let queue = state.engine.queue().stats();

    Json(HealthResponse {
        status: if store_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        store: store.backend(),
        store_healthy,
        queued: queue.pending + queue.scheduled,
        active: queue.active,
        jobs_in_flight: state.engine.jobs().len(),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
