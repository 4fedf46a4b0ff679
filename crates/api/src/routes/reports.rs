//! Report Routes

use axum::{
    extract::{Query, State},
    http::{header, HeaderName, HeaderValue},
    response::IntoResponse,
    Json,
};
use analytics::AnalysisKind;
use serde::{Deserialize, Serialize};
use storage::{ReadingQuery, RecordRepository, Statistics};
use tracing::info;

use crate::error::ApiError;
use crate::SharedState;

/// Response header carrying the analysis kind of a digest
pub const ANALYSIS_KIND_HEADER: &str = "x-analysis-kind";

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    /// All devices when absent
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub device_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CacheResponse {
    pub status: String,
    pub backend: String,
}

/// Aggregate statistics for one device or all devices
pub async fn get_statistics(
    State(state): State<SharedState>,
    Query(params): Query<StatisticsQuery>,
) -> Result<Json<Statistics>, ApiError> {
    let state = state.read().await;
    let stats = state
        .engine
        .repository()
        .get_statistics(params.device_id.as_deref())
        .await?;
    Ok(Json(stats))
}

/// Plain-text digest for the text generation service
pub async fn get_summary(
    State(state): State<SharedState>,
    Query(params): Query<SummaryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let query = ReadingQuery::parse(params.start.as_deref(), params.end.as_deref())?;
    let kind = match params.kind.as_deref() {
        Some(kind) => kind.parse::<AnalysisKind>()?,
        None => AnalysisKind::default(),
    };

    let state = state.read().await;
    let digest = state
        .engine
        .prepare_digest(params.device_id.as_deref(), &query, kind)
        .await?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            ),
            (
                HeaderName::from_static(ANALYSIS_KIND_HEADER),
                HeaderValue::from_static(digest.kind.as_str()),
            ),
        ],
        digest.text,
    ))
}

/// Drop cached repository data
pub async fn clear_cache(State(state): State<SharedState>) -> Json<CacheResponse> {
    let state = state.read().await;
    let repository = state.engine.repository();
    repository.clear_cache();
    info!("Cache cleared for {} backend", repository.backend_name());

    Json(CacheResponse {
        status: "cleared".to_string(),
        backend: repository.backend_name().to_string(),
    })
}
