use std::net::SocketAddr;
use std::sync::Arc;

use storyreel_api::config::{LogFormat, ServerConfig};
use storyreel_api::router::build_app_router;
use storyreel_api::state::AppState;
use storyreel_cloud::StorageConfig;
use storyreel_db::{MemoryStore, PgStore, Store};
use storyreel_events::EventBus;
use storyreel_genworker::HttpFetcher;
use storyreel_pipeline::{EngineConfig, EngineDeps, Orchestrator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let engine_config = EngineConfig::from_env().expect("Invalid engine configuration");
    let storage_config = StorageConfig::from_env().expect("Invalid storage configuration");

    // --- Tracing ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "storyreel_api=debug,storyreel_pipeline=debug,storyreel_queue=info,tower_http=debug".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Store ---
    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            let pool = storyreel_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            storyreel_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            storyreel_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, task records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Storage ---
    let storage = storage_config.build();
    tracing::info!(local = storage.local.is_some(), "Artifact storage configured");

    // --- Generation worker ---
    let worker = engine_config
        .worker_api()
        .expect("Failed to build generation worker client");
    tracing::info!(worker_addr = %engine_config.worker_addr, "Generation worker client created");
    let fetcher = HttpFetcher::new(reqwest::Client::new());

    // --- Engine ---
    let engine = Arc::new(Orchestrator::new(
        EngineDeps {
            store,
            worker: Arc::new(worker),
            fetcher: Arc::new(fetcher),
            storage: storage.provider.clone(),
            events: Arc::new(EventBus::default()),
        },
        engine_config,
    ));

    match engine.recover().await {
        Ok(report) => tracing::info!(
            requeued = report.requeued,
            released = report.released,
            cascaded = report.cascaded,
            "Recovered tasks from previous run",
        ),
        Err(e) => tracing::error!(error = %e, "Task recovery failed"),
    }
    let engine_handle = engine.start();

    // --- App state ---
    let state = AppState {
        engine: Arc::clone(&engine),
        config: Arc::new(config.clone()),
        local_storage: storage.local.clone(),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping engine");
    engine_handle.shutdown().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
