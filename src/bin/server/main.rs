//! Basalt TSDB HTTP Server
//!
//! Serves the OpenTSDB-compatible query API over an in-memory store.
//!
//! # Endpoints
//!
//! ## Query
//! - `GET /api/query` - URL-form query (`start`, `end`, `msResolution`, `m`)
//! - `POST /api/query` - JSON body query
//! - `GET /api/config/filters` - supported filter types (none)
//!
//! ## Write
//! - `POST /api/put` - OpenTSDB-style datapoint ingest
//!
//! ## Admin
//! - `GET /health` - health check
//! - `GET /api/stats` - server statistics
//!
//! # Configuration
//!
//! Read from the `BASALT_CONFIG` environment variable (path to a TOML
//! file), falling back to `./basalt.toml`, then defaults; individual keys
//! can be overridden via `BASALT_*` environment variables.

mod handlers;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use basalt_tsdb::storage::MemoryStore;
use basalt_tsdb::{Config, QueryDriver, QueryExecutor};
use handlers::AppState;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shard window span in seconds for the in-memory store
const SHARD_SPAN_SECONDS: u64 = 86_400;

// =============================================================================
// Router and Server Setup
// =============================================================================

fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/query",
            get(handlers::query_get).post(handlers::query_post),
        )
        .route("/api/config/filters", get(handlers::config_filters))
        .route("/api/put", post(handlers::put_points))
        .route("/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        .with_state(state.clone())
        .layer(build_cors_layer(&state.config.server.cors_allowed_origins))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, starting graceful shutdown");
}

fn load_config() -> Result<Config, String> {
    let config = if let Ok(path) = std::env::var("BASALT_CONFIG") {
        Config::from_file_with_env(&path)?
    } else if std::path::Path::new("basalt.toml").exists() {
        Config::from_file_with_env("basalt.toml")?
    } else {
        Config::from_env()
    };
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("starting Basalt TSDB server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        resolution = %config.tsdb.timestamp_resolution,
        parallel = config.query.executor.parallel,
        "configuration loaded"
    );

    let resolution = config.tsdb.timestamp_resolution;
    let shard_span = SHARD_SPAN_SECONDS * resolution.units_per_second();
    let store = Arc::new(MemoryStore::new(shard_span));

    let executor = QueryExecutor::init(&config.query.executor);
    let driver = Arc::new(QueryDriver::new(store.clone(), executor.clone(), &config));

    let state = Arc::new(AppState {
        driver,
        store,
        config: config.clone(),
        queries_served: AtomicU64::new(0),
        query_errors: AtomicU64::new(0),
        points_written: AtomicU64::new(0),
    });

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    executor.shutdown();
    info!("server shutdown complete");
    Ok(())
}
