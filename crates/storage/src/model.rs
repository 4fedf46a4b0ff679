//! Device, Reading and derived Statistics

use crate::timestamp::{self, serde_iso};
use crate::StorageError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Display name used when statistics span every device
pub const ALL_DEVICES_NAME: &str = "All devices";

/// Sensor unit metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub device_name: String,
    pub location: String,
}

/// Status assigned upstream from temperature thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Normal,
    Warning,
    Alert,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Normal => "normal",
            ReadingStatus::Warning => "warning",
            ReadingStatus::Alert => "alert",
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(ReadingStatus::Normal),
            "warning" => Ok(ReadingStatus::Warning),
            "alert" => Ok(ReadingStatus::Alert),
            other => Err(StorageError::decode("status", format!("unknown status '{other}'"))),
        }
    }
}

/// One timestamped observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(with = "serde_iso")]
    pub timestamp: NaiveDateTime,
    pub temperature: f64,
    pub humidity: f64,
    pub status: ReadingStatus,
}

/// Reading flattened together with its device identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    #[serde(flatten)]
    pub reading: Reading,
    pub device_id: String,
    pub device_name: String,
    pub location: String,
}

impl DeviceReading {
    pub fn new(device: &Device, reading: Reading) -> Self {
        Self {
            reading,
            device_id: device.device_id.clone(),
            device_name: device.device_name.clone(),
            location: device.location.clone(),
        }
    }
}

/// Device entry of a readings document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDocument {
    pub device_id: String,
    pub device_name: String,
    pub location: String,
    #[serde(default)]
    pub readings: Vec<Reading>,
}

impl DeviceDocument {
    pub fn device(&self) -> Device {
        Device {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            location: self.location.clone(),
        }
    }
}

/// The file-backed source format, also produced by store snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub devices: Vec<DeviceDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Time window and row cap for reading lookups
///
/// Bounds are inclusive. `limit` keeps the most recent N matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingQuery {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub limit: Option<usize>,
}

impl ReadingQuery {
    /// Every reading
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        Self {
            start,
            end,
            limit: None,
        }
    }

    /// The N most recent readings
    pub fn latest(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Build a window from ISO-8601 or store DATETIME text
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, StorageError> {
        Ok(Self::between(
            start.map(timestamp::parse).transpose()?,
            end.map(timestamp::parse).transpose()?,
        ))
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn has_window(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        self.start.map_or(true, |s| *ts >= s) && self.end.map_or(true, |e| *ts <= e)
    }
}

/// Aggregate statistics over a reading selection
///
/// A selection with no readings yields `Statistics::empty()`, never a
/// partially filled value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub device_name: String,
    pub total_readings: usize,
    pub avg_temperature: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub temperature_range: f64,
    pub normal_count: usize,
    pub warning_count: usize,
    pub alert_count: usize,
}

impl Statistics {
    /// The canonical "no data" value
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.total_readings == 0
    }

    /// Compute over (temperature, status) pairs
    pub fn compute<I>(device_name: &str, samples: I) -> Self
    where
        I: IntoIterator<Item = (f64, ReadingStatus)>,
    {
        let mut stats = Self {
            device_name: device_name.to_string(),
            min_temperature: f64::MAX,
            max_temperature: f64::MIN,
            ..Self::default()
        };
        let mut sum = 0.0;

        for (temperature, status) in samples {
            stats.total_readings += 1;
            sum += temperature;
            stats.min_temperature = stats.min_temperature.min(temperature);
            stats.max_temperature = stats.max_temperature.max(temperature);
            match status {
                ReadingStatus::Normal => stats.normal_count += 1,
                ReadingStatus::Warning => stats.warning_count += 1,
                ReadingStatus::Alert => stats.alert_count += 1,
            }
        }

        if stats.total_readings == 0 {
            return Self::empty();
        }

        stats.avg_temperature = sum / stats.total_readings as f64;
        stats.temperature_range = stats.max_temperature - stats.min_temperature;
        stats
    }

    pub fn from_readings<'a, I>(device_name: &str, readings: I) -> Self
    where
        I: IntoIterator<Item = &'a Reading>,
    {
        Self::compute(
            device_name,
            readings.into_iter().map(|r| (r.temperature, r.status)),
        )
    }
}
