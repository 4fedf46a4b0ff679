//! Analytics Engine
//!
//! Every operation reads the repository afresh; nothing is carried between
//! calls. Repository failures propagate unchanged so callers can tell "no
//! data" apart from "backend unavailable".

use crate::anomaly::{self, Anomaly};
use crate::summary::{DateRange, Digest, SummaryFormatter};
use crate::table::{ReadingTable, TableRow};
use crate::trend::{self, TrendAnalysis};
use crate::{AnalysisKind, AnalyticsError};
use serde::{Deserialize, Serialize};
use storage::{ReadingQuery, RecordRepository};
use tracing::debug;

/// Engine defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// z-score above which a reading is anomalous
    pub anomaly_threshold: f64,
    /// Readings considered for trend direction
    pub trend_window: usize,
    /// Anomalies listed in a device overview
    pub overview_anomalies: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: 3.0,
            trend_window: 5,
            overview_anomalies: 5,
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        validate_threshold(self.anomaly_threshold)?;
        validate_window(self.trend_window)
    }
}

pub struct AnalyticsEngine<R> {
    pub(crate) repo: R,
    pub(crate) config: AnalyticsConfig,
    formatter: SummaryFormatter,
}

impl<R: RecordRepository> AnalyticsEngine<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            config: AnalyticsConfig::default(),
            formatter: SummaryFormatter::default(),
        }
    }

    pub fn with_config(repo: R, config: AnalyticsConfig) -> Result<Self, AnalyticsError> {
        config.validate()?;
        Ok(Self {
            repo,
            config,
            formatter: SummaryFormatter::default(),
        })
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Time-ordered rows for one device, or the union of all devices.
    ///
    /// An unknown device gives an empty table.
    pub async fn to_table(
        &self,
        device_id: Option<&str>,
        query: &ReadingQuery,
    ) -> Result<ReadingTable, AnalyticsError> {
        let rows: Vec<TableRow> = match device_id {
            Some(id) => {
                let Some(device) = self.repo.get_device_by_id(id).await? else {
                    debug!("Unknown device {}, empty table", id);
                    return Ok(ReadingTable::default());
                };
                self.repo
                    .get_device_readings(id, query)
                    .await?
                    .into_iter()
                    .map(|r| TableRow::new(&device, r))
                    .collect()
            }
            None => self
                .repo
                .get_all_readings()
                .await?
                .into_iter()
                .filter(|r| query.contains(&r.reading.timestamp))
                .map(TableRow::from)
                .collect(),
        };

        let mut table = ReadingTable::new(rows);
        if device_id.is_none() {
            if let Some(limit) = query.limit {
                table = ReadingTable::new(latest(table, limit));
            }
        }
        Ok(table)
    }

    /// Readings of one device whose |z| exceeds `threshold`
    pub async fn detect_anomalies(
        &self,
        device_id: &str,
        threshold: f64,
        query: &ReadingQuery,
    ) -> Result<Vec<Anomaly>, AnalyticsError> {
        validate_threshold(threshold)?;
        let table = self.to_table(Some(device_id), query).await?;
        let anomalies = anomaly::detect(&table, device_id, threshold);
        debug!(
            "{} anomalies in {} readings of {} (threshold {})",
            anomalies.len(),
            table.len(),
            device_id,
            threshold
        );
        Ok(anomalies)
    }

    /// Trend over the full history of one device; `None` without readings
    pub async fn get_trend_analysis(
        &self,
        device_id: &str,
        window_size: usize,
    ) -> Result<Option<TrendAnalysis>, AnalyticsError> {
        validate_window(window_size)?;
        let table = self.to_table(Some(device_id), &ReadingQuery::all()).await?;
        Ok(trend::analyze(device_id, &table.temperatures(), window_size))
    }

    /// Fixed-structure text digest for one device or all devices.
    ///
    /// With a window, statistics are recomputed over the windowed table;
    /// otherwise the repository aggregate is used. Anomalies are listed only
    /// for a single device.
    pub async fn prepare_summary(
        &self,
        device_id: Option<&str>,
        query: &ReadingQuery,
    ) -> Result<String, AnalyticsError> {
        let mut stats = self.repo.get_statistics(device_id).await?;
        if stats.is_empty() {
            return Ok(self.formatter.format(&stats, &[], None));
        }

        let table = self.to_table(device_id, query).await?;
        if query.has_window() {
            stats = table.statistics(&stats.device_name);
        }

        let anomalies = match device_id {
            Some(id) if !table.is_empty() => {
                anomaly::detect(&table, id, self.config.anomaly_threshold)
            }
            _ => Vec::new(),
        };

        Ok(self.formatter.format(&stats, &anomalies, DateRange::of(query)))
    }

    /// Digest tagged with the analysis the generation service should run
    pub async fn prepare_digest(
        &self,
        device_id: Option<&str>,
        query: &ReadingQuery,
        kind: AnalysisKind,
    ) -> Result<Digest, AnalyticsError> {
        Ok(Digest {
            kind,
            device_id: device_id.map(str::to_string),
            text: self.prepare_summary(device_id, query).await?,
        })
    }
}

fn latest(table: ReadingTable, limit: usize) -> Vec<TableRow> {
    let rows = table.rows();
    rows[rows.len().saturating_sub(limit)..].to_vec()
}

pub(crate) fn validate_threshold(threshold: f64) -> Result<(), AnalyticsError> {
    if threshold.is_finite() && threshold >= 0.0 {
        Ok(())
    } else {
        Err(AnalyticsError::InvalidThreshold(threshold))
    }
}

pub(crate) fn validate_window(window: usize) -> Result<(), AnalyticsError> {
    if window == 0 {
        return Err(AnalyticsError::InvalidWindow(window));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::NO_DATA;
    use crate::trend::TrendDirection;
    use std::io::Write;
    use storage::{FileRepository, StorageError};
    use tempfile::NamedTempFile;

    fn reading(ts: &str, temperature: f64, status: &str) -> serde_json::Value {
        serde_json::json!({"timestamp": ts, "temperature": temperature, "humidity": 55.0, "status": status})
    }

    fn fixture() -> NamedTempFile {
        let doc = serde_json::json!({"devices": [
            {
                "device_id": "sensor-001",
                "device_name": "Server Room",
                "location": "Building A",
                "readings": [
                    reading("2024-01-01T08:00:00", 25.3, "normal"),
                    reading("2024-01-01T09:00:00", 26.1, "normal"),
                    reading("2024-01-01T10:00:00", 27.8, "warning"),
                    reading("2024-01-01T11:00:00", 29.2, "alert"),
                    reading("2024-01-01T12:00:00", 30.2, "alert"),
                ]
            },
            {
                "device_id": "sensor-002",
                "device_name": "Warehouse",
                "location": "Building B",
                "readings": [
                    reading("2024-01-01T08:30:00", 25.0, "normal"),
                    reading("2024-01-02T08:30:00", 25.0, "normal"),
                    reading("2024-01-03T08:30:00", 40.0, "alert"),
                ]
            },
            {
                "device_id": "sensor-003",
                "device_name": "Attic",
                "location": "Building C",
                "readings": []
            }
        ]});
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(doc.to_string().as_bytes()).unwrap();
        file
    }

    fn engine(file: &NamedTempFile) -> AnalyticsEngine<FileRepository> {
        AnalyticsEngine::new(FileRepository::new(file.path()))
    }

    #[tokio::test]
    async fn test_union_table_is_sorted_with_identity() {
        let file = fixture();
        let engine = engine(&file);

        let table = engine.to_table(None, &ReadingQuery::all()).await.unwrap();
        assert_eq!(table.len(), 8);
        assert!(table.rows().windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(table.rows()[1].device_name, "Warehouse");

        let window = ReadingQuery::parse(Some("2024-01-01T10:00:00"), Some("2024-01-02")).unwrap();
        let table = engine.to_table(None, &window).await.unwrap();
        assert_eq!(table.temperatures(), vec![27.8, 29.2, 30.2]);

        let recent = engine.to_table(None, &ReadingQuery::latest(2)).await.unwrap();
        assert_eq!(recent.temperatures(), vec![25.0, 40.0]);
    }

    #[tokio::test]
    async fn test_to_table_is_idempotent() {
        let file = fixture();
        let engine = engine(&file);

        let first = engine.to_table(Some("sensor-001"), &ReadingQuery::all()).await.unwrap();
        let second = engine.to_table(Some("sensor-001"), &ReadingQuery::all()).await.unwrap();
        assert_eq!(first, second);
        assert!(engine
            .to_table(Some("sensor-999"), &ReadingQuery::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_anomaly_scenario() {
        let file = fixture();
        let engine = engine(&file);

        let anomalies = engine
            .detect_anomalies("sensor-002", 3.0, &ReadingQuery::all())
            .await
            .unwrap();
        assert!(anomalies.is_empty());

        let anomalies = engine
            .detect_anomalies("sensor-002", 1.0, &ReadingQuery::all())
            .await
            .unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].z_score, 1.15);
        assert_eq!(anomalies[0].device_id, "sensor-002");

        assert!(matches!(
            engine.detect_anomalies("sensor-002", f64::NAN, &ReadingQuery::all()).await,
            Err(AnalyticsError::InvalidThreshold(_))
        ));
    }

    #[tokio::test]
    async fn test_trend_scenario() {
        let file = fixture();
        let engine = engine(&file);

        let trend = engine.get_trend_analysis("sensor-001", 5).await.unwrap().unwrap();
        assert_eq!(trend.trend, TrendDirection::Rising);
        assert_eq!(trend.trend_rate, 0.98);
        assert_eq!(trend.current_temp, 30.2);

        assert!(engine.get_trend_analysis("sensor-003", 5).await.unwrap().is_none());
        assert!(matches!(
            engine.get_trend_analysis("sensor-001", 0).await,
            Err(AnalyticsError::InvalidWindow(0))
        ));
    }

    #[tokio::test]
    async fn test_summary_for_device() {
        let file = fixture();
        let engine = engine(&file);

        let text = engine.prepare_summary(Some("sensor-001"), &ReadingQuery::all()).await.unwrap();
        assert!(text.contains("Device name: Server Room\n"));
        assert!(text.contains("Total readings: 5\n"));
        assert!(text.contains("Alert status: 2 times\n"));
        assert!(!text.contains("Anomalies detected"));
        assert!(!text.contains("Date range"));
    }

    #[tokio::test]
    async fn test_summary_recomputes_over_window() {
        let file = fixture();
        let engine = engine(&file);

        let window = ReadingQuery::parse(Some("2024-01-01T10:00:00"), Some("2024-01-01T11:00:00")).unwrap();
        let text = engine.prepare_summary(Some("sensor-001"), &window).await.unwrap();
        assert!(text.contains("Total readings: 2\n"));
        assert!(text.contains("Minimum temperature: 27.80°C\n"));
        assert!(text.ends_with("Date range: from 2024-01-01 to 2024-01-01\n"));

        let all = engine.prepare_summary(None, &ReadingQuery::all()).await.unwrap();
        assert!(all.contains("Device name: All devices\n"));
        assert!(all.contains("Total readings: 8\n"));
    }

    #[tokio::test]
    async fn test_summary_sentinel_without_data() {
        let file = fixture();
        let engine = engine(&file);

        assert_eq!(
            engine.prepare_summary(Some("sensor-003"), &ReadingQuery::all()).await.unwrap(),
            NO_DATA
        );
        assert_eq!(
            engine.prepare_summary(Some("sensor-999"), &ReadingQuery::all()).await.unwrap(),
            NO_DATA
        );

        let empty_window = ReadingQuery::parse(Some("2030-01-01"), None).unwrap();
        assert_eq!(
            engine.prepare_summary(Some("sensor-001"), &empty_window).await.unwrap(),
            NO_DATA
        );
    }

    #[tokio::test]
    async fn test_digest_carries_kind() {
        let file = fixture();
        let engine = engine(&file);
        let digest = engine
            .prepare_digest(Some("sensor-001"), &ReadingQuery::all(), AnalysisKind::Trend)
            .await
            .unwrap();
        assert_eq!(digest.kind, AnalysisKind::Trend);
        assert_eq!(digest.device_id.as_deref(), Some("sensor-001"));
        assert!(digest.text.starts_with("Temperature Data Summary:"));
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let engine = AnalyticsEngine::new(FileRepository::new("/nonexistent/data.json"));
        let err = engine.to_table(None, &ReadingQuery::all()).await.unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::Storage(StorageError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(AnalyticsConfig::default().validate().is_ok());
        let bad = AnalyticsConfig {
            anomaly_threshold: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
