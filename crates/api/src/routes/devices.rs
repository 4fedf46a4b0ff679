//! Device Routes

use axum::{
    extract::{Path, Query, State},
    Json,
};
use analytics::{Anomaly, ChartSeries, DeviceOverview, DeviceSummary, TrendAnalysis};
use serde::{Deserialize, Serialize};
use storage::{Reading, ReadingQuery, RecordRepository};

use crate::error::ApiError;
use crate::SharedState;

/// Upper bound on `limit` for readings
const MAX_READINGS: usize = 10_000;

/// Time window query parameters
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    /// ISO-8601 or `YYYY-MM-DD HH:MM:SS`
    pub start: Option<String>,
    pub end: Option<String>,
    /// Keep only the N most recent readings
    pub limit: Option<usize>,
}

impl WindowQuery {
    pub fn reading_query(&self) -> Result<ReadingQuery, ApiError> {
        let query = ReadingQuery::parse(self.start.as_deref(), self.end.as_deref())?;
        Ok(match self.limit {
            Some(limit) => query.with_limit(limit.min(MAX_READINGS)),
            None => query,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AnomalyQuery {
    pub threshold: Option<f64>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    pub window: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    pub data: Vec<DeviceSummary>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub device_id: String,
    pub data: Vec<Reading>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct AnomalyResponse {
    pub device_id: String,
    pub threshold: f64,
    pub data: Vec<Anomaly>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct TrendResponse {
    pub device_id: String,
    /// Absent when the device has no readings
    pub trend: Option<TrendAnalysis>,
}

/// List devices with reading counts
pub async fn list_devices(State(state): State<SharedState>) -> Result<Json<DeviceListResponse>, ApiError> {
    let state = state.read().await;
    let data = state.engine.device_list().await?;
    Ok(Json(DeviceListResponse {
        count: data.len(),
        data,
    }))
}

/// Overview of one device
pub async fn get_device(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceOverview>, ApiError> {
    let state = state.read().await;
    state
        .engine
        .device_overview(&device_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(device_id))
}

/// Readings of one device, ascending
pub async fn get_readings(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<ReadingsResponse>, ApiError> {
    let query = params.reading_query()?;
    let state = state.read().await;
    let data = state
        .engine
        .repository()
        .get_device_readings(&device_id, &query)
        .await?;

    Ok(Json(ReadingsResponse {
        device_id,
        count: data.len(),
        data,
    }))
}

/// Anomalous readings of one device
pub async fn get_anomalies(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
    Query(params): Query<AnomalyQuery>,
) -> Result<Json<AnomalyResponse>, ApiError> {
    let query = ReadingQuery::parse(params.start.as_deref(), params.end.as_deref())?;
    let state = state.read().await;
    let threshold = params
        .threshold
        .unwrap_or(state.engine.config().anomaly_threshold);

    let data = state
        .engine
        .detect_anomalies(&device_id, threshold, &query)
        .await?;

    Ok(Json(AnomalyResponse {
        device_id,
        threshold,
        count: data.len(),
        data,
    }))
}

/// Trend of one device
pub async fn get_trend(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
    Query(params): Query<TrendQuery>,
) -> Result<Json<TrendResponse>, ApiError> {
    let state = state.read().await;
    let window = params.window.unwrap_or(state.engine.config().trend_window);
    let trend = state.engine.get_trend_analysis(&device_id, window).await?;
    Ok(Json(TrendResponse { device_id, trend }))
}

/// Plot series of one device
pub async fn get_chart(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
) -> Result<Json<ChartSeries>, ApiError> {
    let state = state.read().await;
    Ok(Json(state.engine.chart_series(&device_id).await?))
}
