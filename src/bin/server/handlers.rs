//! HTTP handlers for the Basalt TSDB server
//!
//! Thin adapters between axum and the blocking query engine. Query
//! execution may park on the worker-pool barrier, so handlers run the
//! driver inside `spawn_blocking` rather than on the async runtime.
//!
//! Error mapping follows the OpenTSDB contract: parse and validation
//! failures return 400 with a one-line `text/plain` diagnostic, an
//! over-limit response returns 413 with an empty body.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use basalt_tsdb::storage::MemoryStore;
use basalt_tsdb::{Config, Error, QueryDriver, TsResolution};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state
pub struct AppState {
    /// The query driver
    pub driver: Arc<QueryDriver>,
    /// In-memory storage backend
    pub store: Arc<MemoryStore>,
    /// Server configuration
    pub config: Config,
    /// Number of queries served
    pub queries_served: AtomicU64,
    /// Number of queries that failed
    pub query_errors: AtomicU64,
    /// Number of points ingested
    pub points_written: AtomicU64,
}

fn json_ok(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

fn error_response(err: &Error) -> Response {
    match err {
        Error::BadRequest(msg) => (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain")],
            format!("Error: {}\n", msg),
        )
            .into_response(),
        Error::ResponseTooLarge { .. } => {
            StatusCode::PAYLOAD_TOO_LARGE.into_response()
        }
        Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn query_response(state: &AppState, result: basalt_tsdb::Result<String>) -> Response {
    match result {
        Ok(body) => {
            state.queries_served.fetch_add(1, Ordering::Relaxed);
            json_ok(body)
        }
        Err(err) => {
            state.query_errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %err, "query failed");
            error_response(&err)
        }
    }
}

// =============================================================================
// Query Handlers
// =============================================================================

/// `GET /api/query`
pub async fn query_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    debug!(?params, "GET /api/query");
    let driver = state.driver.clone();
    let result = tokio::task::spawn_blocking(move || driver.handle_get(&params))
        .await
        .unwrap_or_else(|e| Err(Error::Internal(format!("query task panicked: {}", e))));
    query_response(&state, result)
}

/// `POST /api/query`
pub async fn query_post(State(state): State<Arc<AppState>>, body: String) -> Response {
    let driver = state.driver.clone();
    let result = tokio::task::spawn_blocking(move || driver.handle_post(&body))
        .await
        .unwrap_or_else(|e| Err(Error::Internal(format!("query task panicked: {}", e))));
    query_response(&state, result)
}

/// `GET /api/config/filters` — no extended filter types are supported
pub async fn config_filters(State(state): State<Arc<AppState>>) -> Response {
    json_ok(state.driver.config_filters().to_string())
}

// =============================================================================
// Ingest Handler
// =============================================================================

/// One OpenTSDB-style put datapoint
#[derive(Debug, Deserialize)]
pub struct PutDatapoint {
    /// Metric name
    pub metric: String,
    /// Timestamp in either resolution
    pub timestamp: u64,
    /// Measurement value
    pub value: f64,
    /// Series tags
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// `POST /api/put` — single datapoint object or an array of them
pub async fn put_points(State(state): State<Arc<AppState>>, body: String) -> Response {
    let value: serde_json::Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            return error_response(&Error::BadRequest(format!("invalid JSON body: {}", e)));
        }
    };

    let points: Vec<PutDatapoint> = {
        let result = if value.is_array() {
            serde_json::from_value(value)
        } else {
            serde_json::from_value(value).map(|p| vec![p])
        };
        match result {
            Ok(points) => points,
            Err(e) => {
                return error_response(&Error::BadRequest(format!("invalid datapoint: {}", e)));
            }
        }
    };

    let resolution = state.config.tsdb.timestamp_resolution;
    let mut written = 0u64;
    for point in points {
        let tags: basalt_tsdb::TagSet = point.tags.into_iter().collect();
        state.store.put(
            &point.metric,
            &tags,
            resolution.normalize(point.timestamp),
            point.value,
        );
        written += 1;
    }
    state.points_written.fetch_add(written, Ordering::Relaxed);
    StatusCode::NO_CONTENT.into_response()
}

// =============================================================================
// Health & Stats
// =============================================================================

/// Health check response body
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Server statistics response body
#[derive(Serialize)]
pub struct StatsResponse {
    /// Queries served successfully
    pub queries_served: u64,
    /// Queries that failed
    pub query_errors: u64,
    /// Points ingested
    pub points_written: u64,
    /// Number of live shards
    pub shards: usize,
    /// Process timestamp resolution
    pub timestamp_resolution: TsResolution,
}

/// `GET /api/stats`
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        queries_served: state.queries_served.load(Ordering::Relaxed),
        query_errors: state.query_errors.load(Ordering::Relaxed),
        points_written: state.points_written.load(Ordering::Relaxed),
        shards: state.store.shards().len(),
        timestamp_resolution: state.config.tsdb.timestamp_resolution,
    })
}
