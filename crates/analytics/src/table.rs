//! Time-ordered tabular view of readings

use chrono::NaiveDateTime;
use serde::Serialize;
use storage::timestamp::serde_iso;
use storage::{Device, DeviceReading, Reading, ReadingStatus, Statistics};

/// One reading with the identity of its device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    #[serde(with = "serde_iso")]
    pub timestamp: NaiveDateTime,
    pub temperature: f64,
    pub humidity: f64,
    pub status: ReadingStatus,
    pub device_id: String,
    pub device_name: String,
    pub location: String,
}

impl TableRow {
    pub fn new(device: &Device, reading: Reading) -> Self {
        Self {
            timestamp: reading.timestamp,
            temperature: reading.temperature,
            humidity: reading.humidity,
            status: reading.status,
            device_id: device.device_id.clone(),
            device_name: device.device_name.clone(),
            location: device.location.clone(),
        }
    }
}

impl From<DeviceReading> for TableRow {
    fn from(r: DeviceReading) -> Self {
        Self {
            timestamp: r.reading.timestamp,
            temperature: r.reading.temperature,
            humidity: r.reading.humidity,
            status: r.reading.status,
            device_id: r.device_id,
            device_name: r.device_name,
            location: r.location,
        }
    }
}

/// Rows sorted ascending by timestamp.
///
/// The sort is stable, so rows sharing a timestamp keep repository order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadingTable {
    rows: Vec<TableRow>,
}

impl ReadingTable {
    pub fn new(mut rows: Vec<TableRow>) -> Self {
        rows.sort_by_key(|r| r.timestamp);
        Self { rows }
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&TableRow> {
        self.rows.last()
    }

    pub fn temperatures(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.temperature).collect()
    }

    /// Statistics over every row; empty table gives `Statistics::empty()`
    pub fn statistics(&self, device_name: &str) -> Statistics {
        Statistics::compute(
            device_name,
            self.rows.iter().map(|r| (r.temperature, r.status)),
        )
    }
}
