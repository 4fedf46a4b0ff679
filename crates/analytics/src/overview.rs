//! Device listing, overview and chart series

use crate::anomaly::{self, Anomaly};
use crate::engine::AnalyticsEngine;
use crate::trend::{self, TrendAnalysis};
use crate::AnalyticsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use storage::{timestamp, Reading, ReadingQuery, ReadingStatus, RecordRepository, Statistics};

/// Analysis requested of the text generation service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    #[default]
    Comprehensive,
    Anomaly,
    Trend,
    Recommendation,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Comprehensive => "comprehensive",
            AnalysisKind::Anomaly => "anomaly",
            AnalysisKind::Trend => "trend",
            AnalysisKind::Recommendation => "recommendation",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "comprehensive" => Ok(AnalysisKind::Comprehensive),
            "anomaly" => Ok(AnalysisKind::Anomaly),
            "trend" => Ok(AnalysisKind::Trend),
            "recommendation" => Ok(AnalysisKind::Recommendation),
            other => Err(AnalyticsError::UnknownAnalysisKind(other.to_string())),
        }
    }
}

/// Device with its reading count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub device_id: String,
    pub device_name: String,
    pub location: String,
    pub readings_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceOverview {
    pub device_id: String,
    pub statistics: Statistics,
    pub latest_reading: Option<Reading>,
    pub trend: Option<TrendAnalysis>,
    /// Total anomalies at the configured threshold
    pub anomalies_count: usize,
    /// The earliest few of them
    pub anomalies: Vec<Anomaly>,
}

/// Parallel series for plotting
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    /// `YYYY-MM-DD HH:MM:SS`
    pub timestamps: Vec<String>,
    pub temperatures: Vec<f64>,
    pub humidity: Vec<f64>,
    pub status: Vec<ReadingStatus>,
}

impl<R: RecordRepository> AnalyticsEngine<R> {
    pub async fn device_list(&self) -> Result<Vec<DeviceSummary>, AnalyticsError> {
        let devices = self.repo.get_all_devices().await?;
        let mut list = Vec::with_capacity(devices.len());
        for device in devices {
            let stats = self.repo.get_statistics(Some(&device.device_id)).await?;
            list.push(DeviceSummary {
                device_id: device.device_id,
                device_name: device.device_name,
                location: device.location,
                readings_count: stats.total_readings,
            });
        }
        Ok(list)
    }

    /// Statistics, latest reading, trend and anomalies of one device.
    /// `None` for an unknown device.
    pub async fn device_overview(&self, device_id: &str) -> Result<Option<DeviceOverview>, AnalyticsError> {
        if self.repo.get_device_by_id(device_id).await?.is_none() {
            return Ok(None);
        }

        let statistics = self.repo.get_statistics(Some(device_id)).await?;
        let latest_reading = self.repo.get_latest_reading(device_id).await?;
        let table = self.to_table(Some(device_id), &ReadingQuery::all()).await?;

        let trend = trend::analyze(device_id, &table.temperatures(), self.config.trend_window);
        let mut anomalies = anomaly::detect(&table, device_id, self.config.anomaly_threshold);
        let anomalies_count = anomalies.len();
        anomalies.truncate(self.config.overview_anomalies);

        Ok(Some(DeviceOverview {
            device_id: device_id.to_string(),
            statistics,
            latest_reading,
            trend,
            anomalies_count,
            anomalies,
        }))
    }

    pub async fn chart_series(&self, device_id: &str) -> Result<ChartSeries, AnalyticsError> {
        let table = self.to_table(Some(device_id), &ReadingQuery::all()).await?;
        let mut series = ChartSeries::default();
        for row in table.rows() {
            series.timestamps.push(timestamp::to_store_text(&row.timestamp));
            series.temperatures.push(row.temperature);
            series.humidity.push(row.humidity);
            series.status.push(row.status);
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AnalyticsConfig;
    use std::io::Write;
    use storage::FileRepository;
    use tempfile::NamedTempFile;

    fn fixture() -> NamedTempFile {
        let mut readings: Vec<serde_json::Value> = (0..20)
            .map(|i| {
                serde_json::json!({
                    "timestamp": format!("2024-01-01T{:02}:00:00", i),
                    "temperature": 22.0 + (i % 2) as f64 * 0.5,
                    "humidity": 50.0,
                    "status": "normal"
                })
            })
            .collect();
        readings.push(serde_json::json!({
            "timestamp": "2024-01-01T20:00:00", "temperature": 45.0, "humidity": 35.0, "status": "alert"
        }));
        let doc = serde_json::json!({"devices": [
            {"device_id": "sensor-001", "device_name": "Server Room", "location": "Building A", "readings": readings},
            {"device_id": "sensor-002", "device_name": "Idle", "location": "Building B", "readings": []}
        ]});
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(doc.to_string().as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_device_list_counts() {
        let file = fixture();
        let engine = AnalyticsEngine::new(FileRepository::new(file.path()));

        let list = engine.device_list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].readings_count, 21);
        assert_eq!(list[1].readings_count, 0);
    }

    #[tokio::test]
    async fn test_overview() {
        let file = fixture();
        let engine = AnalyticsEngine::new(FileRepository::new(file.path()));

        let overview = engine.device_overview("sensor-001").await.unwrap().unwrap();
        assert_eq!(overview.statistics.total_readings, 21);
        assert_eq!(overview.latest_reading.unwrap().temperature, 45.0);
        assert_eq!(overview.anomalies_count, 1);
        assert_eq!(overview.anomalies[0].temperature, 45.0);
        assert_eq!(overview.trend.unwrap().moving_average.len(), 21);

        let idle = engine.device_overview("sensor-002").await.unwrap().unwrap();
        assert!(idle.statistics.is_empty());
        assert!(idle.trend.is_none());
        assert!(idle.latest_reading.is_none());

        assert!(engine.device_overview("sensor-999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overview_truncates_anomalies() {
        let file = fixture();
        let config = AnalyticsConfig {
            anomaly_threshold: 0.1,
            overview_anomalies: 2,
            ..Default::default()
        };
        let engine = AnalyticsEngine::with_config(FileRepository::new(file.path()), config).unwrap();

        let overview = engine.device_overview("sensor-001").await.unwrap().unwrap();
        assert_eq!(overview.anomalies.len(), 2);
        assert!(overview.anomalies_count > 2);
    }

    #[tokio::test]
    async fn test_chart_series() {
        let file = fixture();
        let engine = AnalyticsEngine::new(FileRepository::new(file.path()));

        let chart = engine.chart_series("sensor-001").await.unwrap();
        assert_eq!(chart.timestamps.len(), 21);
        assert_eq!(chart.timestamps[0], "2024-01-01 00:00:00");
        assert_eq!(chart.status[20], ReadingStatus::Alert);
        assert_eq!(chart.humidity[20], 35.0);

        assert_eq!(engine.chart_series("sensor-999").await.unwrap(), ChartSeries::default());
    }

    #[test]
    fn test_analysis_kind_parse() {
        assert_eq!("trend".parse::<AnalysisKind>().unwrap(), AnalysisKind::Trend);
        assert_eq!(AnalysisKind::default(), AnalysisKind::Comprehensive);
        assert!("poetry".parse::<AnalysisKind>().is_err());
    }
}
