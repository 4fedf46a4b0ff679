//! Sensor Report API Server
//!
//! JSON and plain-text reporting over the analytics engine.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use analytics::AnalyticsEngine;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::Arc;
use storage::{RecordRepository, SourceRepository};
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
mod error;
mod routes;

pub use config::{AppConfig, Backend, LoggingConfig, ServerConfig, SourceConfig};
pub use error::ApiError;

/// Application state shared across handlers
pub struct AppState {
    /// Analytics over the configured repository
    pub engine: AnalyticsEngine<SourceRepository>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
    /// Prometheus exporter, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

pub type SharedState = Arc<RwLock<AppState>>;

impl AppState {
    pub fn new(engine: AnalyticsEngine<SourceRepository>) -> Self {
        Self {
            engine,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub source: SourceHealth,
}

/// Data source health
#[derive(Debug, Serialize)]
pub struct SourceHealth {
    pub backend: String,
    pub status: String,
    pub device_count: Option<usize>,
    pub error: Option<String>,
}

/// Create the application router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/devices", get(routes::devices::list_devices))
        .route("/api/v1/devices/:id", get(routes::devices::get_device))
        .route("/api/v1/devices/:id/readings", get(routes::devices::get_readings))
        .route("/api/v1/devices/:id/anomalies", get(routes::devices::get_anomalies))
        .route("/api/v1/devices/:id/trend", get(routes::devices::get_trend))
        .route("/api/v1/devices/:id/chart", get(routes::devices::get_chart))
        .route("/api/v1/statistics", get(routes::reports::get_statistics))
        .route("/api/v1/summary", get(routes::reports::get_summary))
        .route("/api/v1/cache/clear", post(routes::reports::clear_cache))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Count requests per route and failed responses
async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    metrics::counter!("report_requests_total", "route" => route).increment(1);
    if response.status().is_client_error() || response.status().is_server_error() {
        metrics::counter!("report_errors_total").increment(1);
    }
    response
}

/// Health check handler
async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.read().await;
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let repository = state.engine.repository();
    let source = match repository.get_all_devices().await {
        Ok(devices) => SourceHealth {
            backend: repository.backend_name().to_string(),
            status: "ok".to_string(),
            device_count: Some(devices.len()),
            error: None,
        },
        Err(e) => SourceHealth {
            backend: repository.backend_name().to_string(),
            status: "unavailable".to_string(),
            device_count: None,
            error: Some(e.to_string()),
        },
    };

    Json(HealthResponse {
        status: if source.error.is_none() { "healthy" } else { "degraded" }.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        source,
    })
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<SharedState>) -> Response {
    let state = state.read().await;
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), ApiError> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| ApiError::Config(format!("invalid log level '{}'", config.level)))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let result = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.map_err(|e| ApiError::Config(format!("failed to set tracing subscriber: {e}")))
}

/// Run the server
pub async fn run_server(config: AppConfig) -> Result<(), ApiError> {
    let repository = config.repository()?;
    info!("Using {} backend", repository.backend_name());

    let engine = AnalyticsEngine::with_config(repository, config.analytics.clone())?;
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ApiError::Config(format!("failed to install metrics recorder: {e}")))?;

    let state = Arc::new(RwLock::new(AppState::new(engine).with_metrics(handle)));
    let app = create_router(state.clone());

    info!("Starting API server on {}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let state = state.read().await;
    if let SourceRepository::Store(store) = state.engine.repository() {
        store.close().await;
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
    }
}
