//! Z-score anomaly detection

use crate::statistics::{round2, SeriesStats};
use crate::table::ReadingTable;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use storage::timestamp::serde_iso;

/// Side of the mean an anomaly falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    High,
    Low,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::High => "high",
            AnomalyKind::Low => "low",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reading far from the selection mean
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    #[serde(with = "serde_iso")]
    pub timestamp: NaiveDateTime,
    pub temperature: f64,
    /// |z|, rounded to 2 decimals
    pub z_score: f64,
    pub device_id: String,
    pub device_name: String,
    #[serde(rename = "anomaly_type")]
    pub kind: AnomalyKind,
}

/// Flag every row whose |z| exceeds `threshold`, in table order.
///
/// Zero variance (including a single row) yields no anomalies.
pub fn detect(table: &ReadingTable, device_id: &str, threshold: f64) -> Vec<Anomaly> {
    let stats = SeriesStats::compute(&table.temperatures());
    if !stats.has_variance() {
        return Vec::new();
    }

    table
        .rows()
        .iter()
        .filter_map(|row| {
            let z = ((row.temperature - stats.mean) / stats.std_dev).abs();
            (z > threshold).then(|| Anomaly {
                timestamp: row.timestamp,
                temperature: row.temperature,
                z_score: round2(z),
                device_id: device_id.to_string(),
                device_name: row.device_name.clone(),
                kind: if row.temperature > stats.mean {
                    AnomalyKind::High
                } else {
                    AnomalyKind::Low
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableRow;
    use proptest::prelude::*;
    use storage::{timestamp, ReadingStatus};

    fn table(temps: &[f64]) -> ReadingTable {
        let base = timestamp::parse("2024-01-01T00:00:00").unwrap();
        ReadingTable::new(
            temps
                .iter()
                .enumerate()
                .map(|(i, &temperature)| TableRow {
                    timestamp: base + chrono::Duration::hours(i as i64),
                    temperature,
                    humidity: 50.0,
                    status: ReadingStatus::Normal,
                    device_id: "sensor-001".to_string(),
                    device_name: "Server Room".to_string(),
                    location: "Building A".to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_small_deviation_not_flagged() {
        let t = table(&[25.0, 25.0, 40.0]);
        assert!(detect(&t, "sensor-001", 3.0).is_empty());

        // Lower threshold exposes the computed z-scores
        let flagged = detect(&t, "sensor-001", 0.5);
        let z: Vec<f64> = flagged.iter().map(|a| a.z_score).collect();
        assert_eq!(z, vec![0.58, 0.58, 1.15]);
        assert_eq!(flagged[0].kind, AnomalyKind::Low);
        assert_eq!(flagged[2].kind, AnomalyKind::High);
    }

    #[test]
    fn test_spike_flagged_high() {
        let mut temps = vec![22.0; 20];
        temps.push(45.0);
        temps.extend([22.5, 21.5]);
        let anomalies = detect(&table(&temps), "sensor-001", 3.0);

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].temperature, 45.0);
        assert_eq!(anomalies[0].kind, AnomalyKind::High);
        assert_eq!(anomalies[0].device_name, "Server Room");
        assert!(anomalies[0].z_score > 3.0);
    }

    #[test]
    fn test_single_row_and_empty() {
        assert!(detect(&table(&[30.0]), "sensor-001", 0.0).is_empty());
        assert!(detect(&ReadingTable::default(), "sensor-001", 0.0).is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let flagged = detect(&table(&[20.0, 30.0]), "sensor-001", 0.1);
        let json = serde_json::to_value(&flagged[1]).unwrap();
        assert_eq!(json["anomaly_type"], "high");
        assert_eq!(json["timestamp"], "2024-01-01T01:00:00");
    }

    proptest! {
        #[test]
        fn prop_zero_variance_never_flags(
            value in -50.0f64..150.0,
            len in 0usize..50,
            threshold in 0.0f64..10.0,
        ) {
            let t = table(&vec![value; len]);
            prop_assert!(detect(&t, "sensor-001", threshold).is_empty());
        }
    }
}
