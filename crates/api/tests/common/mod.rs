#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use storyreel_api::config::{LogFormat, ServerConfig};
use storyreel_api::router::build_app_router;
use storyreel_api::state::AppState;
use storyreel_cloud::LocalStorageProvider;
use storyreel_db::MemoryStore;
use storyreel_events::EventBus;
use storyreel_pipeline::testing::{MemoryFetcher, ScriptedWorker};
use storyreel_pipeline::{EngineConfig, EngineDeps, Orchestrator};
use tower::ServiceExt;

/// Public URL prefix the local provider signs; `/files` serves below it.
pub const PUBLIC_URL: &str = "http://localhost/files";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        log_format: LogFormat::Pretty,
        database_url: None,
    }
}

/// Application under test. The engine is not started, so created tasks
/// stay where the API left them.
pub struct TestApp {
    pub router: Router,
    pub engine: Arc<Orchestrator>,
    pub store: Arc<MemoryStore>,
    pub worker: Arc<ScriptedWorker>,
    pub local: Arc<LocalStorageProvider>,
}

pub fn build_test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let worker = Arc::new(ScriptedWorker::new());
    let root = std::env::temp_dir().join(format!("storyreel-api-{}", uuid::Uuid::new_v4()));
    let local = Arc::new(LocalStorageProvider::new(
        root,
        PUBLIC_URL,
        "test-secret",
        Duration::from_secs(600),
    ));

    let engine = Arc::new(Orchestrator::new(
        EngineDeps {
            store: store.clone(),
            worker: worker.clone(),
            fetcher: Arc::new(MemoryFetcher::new()),
            storage: local.clone(),
            events: Arc::new(EventBus::default()),
        },
        EngineConfig {
            dependency_sweep: None,
            ..EngineConfig::default()
        },
    ));

    let config = test_config();
    let state = AppState {
        engine: engine.clone(),
        config: Arc::new(config.clone()),
        local_storage: Some(local.clone()),
    };

    TestApp {
        router: build_app_router(state, &config),
        engine,
        store,
        worker,
        local,
    }
}

/// Send a request and return the status and the body parsed as JSON
/// (`Null` for empty bodies).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_empty(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}
