//! Store-backed Repository
//!
//! Every call goes through the `ConnectionManager`, so transient disconnects
//! are retried transparently. Aggregates are computed by the store. The
//! device list is cached until `clear_cache` is called; writes made through
//! this repository or any other path do not invalidate it.

use crate::config::DatabaseConfig;
use crate::connection::{ConnectionManager, Connector};
use crate::driver::SqlxConnector;
use crate::model::{
    Device, DeviceDocument, DeviceReading, Document, Reading, ReadingQuery, Statistics,
    ALL_DEVICES_NAME,
};
use crate::repository::RecordRepository;
use crate::row::{Row, SqlValue};
use crate::timestamp;
use crate::StorageError;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Readings per device included in a snapshot unless told otherwise
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 1000;

const SELECT_DEVICES: &str = "SELECT device_id, device_name, location FROM devices ORDER BY device_id";

const SELECT_DEVICE: &str = "SELECT device_id, device_name, location FROM devices WHERE device_id = ?";

const SELECT_READINGS: &str = "SELECT CAST(timestamp AS CHAR) AS timestamp, \
     CAST(temperature AS DOUBLE) AS temperature, \
     CAST(humidity AS DOUBLE) AS humidity, status \
     FROM readings WHERE device_id = ?";

const SELECT_AGGREGATE: &str = "SELECT COUNT(*) AS total_readings, \
     CAST(AVG(temperature) AS DOUBLE) AS avg_temperature, \
     CAST(MIN(temperature) AS DOUBLE) AS min_temperature, \
     CAST(MAX(temperature) AS DOUBLE) AS max_temperature, \
     CAST(SUM(CASE WHEN status = 'alert' THEN 1 ELSE 0 END) AS SIGNED) AS alert_count, \
     CAST(SUM(CASE WHEN status = 'warning' THEN 1 ELSE 0 END) AS SIGNED) AS warning_count, \
     CAST(SUM(CASE WHEN status = 'normal' THEN 1 ELSE 0 END) AS SIGNED) AS normal_count \
     FROM readings";

const INSERT_READING: &str = "INSERT INTO readings (device_id, timestamp, temperature, humidity, status) \
     VALUES (?, ?, ?, ?, ?)";

/// Repository over the `devices` and `readings` tables
pub struct StoreRepository<C: Connector> {
    db: ConnectionManager<C>,
    devices_cache: Mutex<Option<Vec<Device>>>,
}

impl StoreRepository<SqlxConnector> {
    /// Repository over a sqlx connection built from configuration
    pub fn connect(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let connector = SqlxConnector::new(config)?;
        Ok(Self::new(ConnectionManager::new(connector, config.max_retries)))
    }
}

impl<C: Connector> StoreRepository<C> {
    pub fn new(db: ConnectionManager<C>) -> Self {
        Self {
            db,
            devices_cache: Mutex::new(None),
        }
    }

    /// The underlying connection manager
    pub fn manager(&self) -> &ConnectionManager<C> {
        &self.db
    }

    /// Insert a device, or update its name and location in place
    pub async fn upsert_device(&self, device: &Device) -> Result<(), StorageError> {
        let existing = self
            .db
            .execute_read(
                "SELECT device_id FROM devices WHERE device_id = ?",
                &[device.device_id.as_str().into()],
            )
            .await?;

        if existing.is_empty() {
            self.db
                .execute_write(
                    "INSERT INTO devices (device_id, device_name, location) VALUES (?, ?, ?)",
                    &[
                        device.device_id.as_str().into(),
                        device.device_name.as_str().into(),
                        device.location.as_str().into(),
                    ],
                )
                .await?;
            info!("Added device: {} ({})", device.device_name, device.device_id);
        } else {
            self.db
                .execute_write(
                    "UPDATE devices SET device_name = ?, location = ? WHERE device_id = ?",
                    &[
                        device.device_name.as_str().into(),
                        device.location.as_str().into(),
                        device.device_id.as_str().into(),
                    ],
                )
                .await?;
            debug!("Updated device: {} ({})", device.device_name, device.device_id);
        }
        Ok(())
    }

    /// Insert one reading. Returns `false` if the device already has a
    /// reading at that timestamp.
    pub async fn insert_reading(&self, device_id: &str, reading: &Reading) -> Result<bool, StorageError> {
        let ts = timestamp::to_store_text(&reading.timestamp);
        let existing = self
            .db
            .execute_read(
                "SELECT id FROM readings WHERE device_id = ? AND timestamp = ?",
                &[device_id.into(), ts.as_str().into()],
            )
            .await?;

        if !existing.is_empty() {
            debug!("Reading already stored, skipping: {} @ {}", device_id, ts);
            return Ok(false);
        }

        self.db
            .execute_write(INSERT_READING, &reading_params(device_id, reading))
            .await?;
        debug!("Stored reading: {} {:.1}°C @ {}", device_id, reading.temperature, ts);
        Ok(true)
    }

    /// Insert many readings in one transaction, skipping timestamps the
    /// device already has. Returns the number inserted.
    pub async fn insert_readings(&self, device_id: &str, readings: &[Reading]) -> Result<u64, StorageError> {
        let rows = self
            .db
            .execute_read(
                "SELECT CAST(timestamp AS CHAR) AS timestamp FROM readings WHERE device_id = ?",
                &[device_id.into()],
            )
            .await?;
        let mut seen = rows
            .iter()
            .map(|row| timestamp::parse(row.get_str("timestamp")?))
            .collect::<Result<HashSet<_>, _>>()?;

        let params_list: Vec<Vec<SqlValue>> = readings
            .iter()
            .filter(|r| seen.insert(r.timestamp))
            .map(|r| reading_params(device_id, r))
            .collect();

        if params_list.is_empty() {
            return Ok(0);
        }

        let inserted = self.db.execute_batch(INSERT_READING, &params_list).await?;
        info!("Stored {} readings for {}", inserted, device_id);
        Ok(inserted)
    }

    /// Every device with its most recent readings, in the file source shape
    pub async fn load_snapshot(&self, per_device_limit: usize) -> Result<Document, StorageError> {
        let devices = self.get_all_devices().await?;
        let query = ReadingQuery::latest(per_device_limit);

        let mut entries = Vec::with_capacity(devices.len());
        for device in devices {
            let readings = self.get_device_readings(&device.device_id, &query).await?;
            entries.push(DeviceDocument {
                device_id: device.device_id,
                device_name: device.device_name,
                location: device.location,
                readings,
            });
        }

        let metadata = serde_json::json!({
            "last_updated": timestamp::to_iso(&chrono::Local::now().naive_local()),
            "total_devices": entries.len(),
            "data_source": "database",
        });
        info!("Loaded snapshot of {} devices from database", entries.len());

        Ok(Document {
            devices: entries,
            metadata: Some(metadata),
        })
    }

    /// Close the connection; the next call reconnects
    pub async fn close(&self) {
        self.db.release().await;
    }

    async fn aggregate(&self, device_name: &str, device_id: Option<&str>) -> Result<Statistics, StorageError> {
        let rows = match device_id {
            Some(id) => {
                let sql = format!("{SELECT_AGGREGATE} WHERE device_id = ?");
                self.db.execute_read(&sql, &[id.into()]).await?
            }
            None => self.db.execute_read(SELECT_AGGREGATE, &[]).await?,
        };

        let Some(row) = rows.first() else {
            return Ok(Statistics::empty());
        };
        let total_readings = count(row, "total_readings")?;
        if total_readings == 0 {
            return Ok(Statistics::empty());
        }

        let min_temperature = row.get_opt_f64("min_temperature")?.unwrap_or(0.0);
        let max_temperature = row.get_opt_f64("max_temperature")?.unwrap_or(0.0);
        Ok(Statistics {
            device_name: device_name.to_string(),
            total_readings,
            avg_temperature: row.get_opt_f64("avg_temperature")?.unwrap_or(0.0),
            min_temperature,
            max_temperature,
            temperature_range: max_temperature - min_temperature,
            normal_count: count(row, "normal_count")?,
            warning_count: count(row, "warning_count")?,
            alert_count: count(row, "alert_count")?,
        })
    }
}

impl<C: Connector> RecordRepository for StoreRepository<C> {
    async fn get_all_devices(&self) -> Result<Vec<Device>, StorageError> {
        let cached = self.devices_cache.lock()?.clone();
        if let Some(devices) = cached {
            return Ok(devices);
        }

        let rows = self.db.execute_read(SELECT_DEVICES, &[]).await?;
        let devices = rows.iter().map(decode_device).collect::<Result<Vec<_>, _>>()?;
        debug!("Cached {} devices", devices.len());

        *self.devices_cache.lock()? = Some(devices.clone());
        Ok(devices)
    }

    async fn get_device_by_id(&self, device_id: &str) -> Result<Option<Device>, StorageError> {
        let rows = self.db.execute_read(SELECT_DEVICE, &[device_id.into()]).await?;
        rows.first().map(decode_device).transpose()
    }

    async fn get_device_readings(
        &self,
        device_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<Reading>, StorageError> {
        let mut sql = SELECT_READINGS.to_string();
        let mut params: Vec<SqlValue> = vec![device_id.into()];

        if let Some(start) = &query.start {
            sql.push_str(" AND timestamp >= ?");
            params.push(timestamp::to_store_text(start).into());
        }
        if let Some(end) = &query.end {
            sql.push_str(" AND timestamp <= ?");
            params.push(timestamp::to_store_text(end).into());
        }

        // Newest first so LIMIT keeps the most recent rows
        sql.push_str(" ORDER BY timestamp DESC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let rows = self.db.execute_read(&sql, &params).await?;
        rows.iter().rev().map(decode_reading).collect()
    }

    async fn get_latest_reading(&self, device_id: &str) -> Result<Option<Reading>, StorageError> {
        let mut readings = self.get_device_readings(device_id, &ReadingQuery::latest(1)).await?;
        Ok(readings.pop())
    }

    async fn get_all_readings(&self) -> Result<Vec<DeviceReading>, StorageError> {
        let mut all = Vec::new();
        for device in self.get_all_devices().await? {
            let readings = self.get_device_readings(&device.device_id, &ReadingQuery::all()).await?;
            all.extend(readings.into_iter().map(|r| DeviceReading::new(&device, r)));
        }
        Ok(all)
    }

    async fn get_statistics(&self, device_id: Option<&str>) -> Result<Statistics, StorageError> {
        match device_id {
            Some(id) => match self.get_device_by_id(id).await? {
                Some(device) => self.aggregate(&device.device_name, Some(id)).await,
                None => Ok(Statistics::empty()),
            },
            None => self.aggregate(ALL_DEVICES_NAME, None).await,
        }
    }

    fn clear_cache(&self) {
        *self.devices_cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
        debug!("Device cache cleared");
    }
}

fn reading_params(device_id: &str, reading: &Reading) -> Vec<SqlValue> {
    vec![
        device_id.into(),
        timestamp::to_store_text(&reading.timestamp).into(),
        reading.temperature.into(),
        reading.humidity.into(),
        reading.status.as_str().into(),
    ]
}

fn decode_device(row: &Row) -> Result<Device, StorageError> {
    Ok(Device {
        device_id: row.get_str("device_id")?.to_string(),
        device_name: row.get_str("device_name")?.to_string(),
        location: row.get_str("location")?.to_string(),
    })
}

fn decode_reading(row: &Row) -> Result<Reading, StorageError> {
    Ok(Reading {
        timestamp: timestamp::parse(row.get_str("timestamp")?)?,
        temperature: row.get_f64("temperature")?,
        humidity: row.get_f64("humidity")?,
        status: row.get_str("status")?.parse()?,
    })
}

/// Aggregate counts may come back as integers or, for SUM, as decimals
fn count(row: &Row, column: &str) -> Result<usize, StorageError> {
    Ok(row.get_opt_f64(column)?.map_or(0, |v| v.max(0.0) as usize))
}
