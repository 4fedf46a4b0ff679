//! File-backed Repository
//!
//! Loads the whole JSON document on first use and serves every lookup from
//! memory. Readings are sorted by timestamp on load.

use crate::model::{
    Device, DeviceDocument, DeviceReading, Document, Reading, ReadingQuery, Statistics,
    ALL_DEVICES_NAME,
};
use crate::repository::RecordRepository;
use crate::StorageError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Repository over a readings document on disk
pub struct FileRepository {
    path: PathBuf,
    document: RwLock<Option<Arc<Document>>>,
}

impl FileRepository {
    /// Create a repository; the file is not read until first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document from disk, replacing any cached copy
    pub async fn reload(&self) -> Result<Arc<Document>, StorageError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::SourceNotFound(self.path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut document: Document = serde_json::from_str(&text)?;
        for device in &mut document.devices {
            device.readings.sort_by_key(|r| r.timestamp);
        }

        info!(
            "Loaded {} devices from {}",
            document.devices.len(),
            self.path.display()
        );

        let document = Arc::new(document);
        *self.document.write()? = Some(Arc::clone(&document));
        Ok(document)
    }

    async fn document(&self) -> Result<Arc<Document>, StorageError> {
        let cached = self.document.read()?.clone();
        match cached {
            Some(document) => Ok(document),
            None => self.reload().await,
        }
    }

    fn find<'a>(document: &'a Document, device_id: &str) -> Option<&'a DeviceDocument> {
        document.devices.iter().find(|d| d.device_id == device_id)
    }
}

impl RecordRepository for FileRepository {
    async fn get_all_devices(&self) -> Result<Vec<Device>, StorageError> {
        let document = self.document().await?;
        Ok(document.devices.iter().map(DeviceDocument::device).collect())
    }

    async fn get_device_by_id(&self, device_id: &str) -> Result<Option<Device>, StorageError> {
        let document = self.document().await?;
        Ok(Self::find(&document, device_id).map(DeviceDocument::device))
    }

    async fn get_device_readings(
        &self,
        device_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<Reading>, StorageError> {
        let document = self.document().await?;
        let Some(device) = Self::find(&document, device_id) else {
            return Ok(Vec::new());
        };

        let mut readings: Vec<Reading> = device
            .readings
            .iter()
            .filter(|r| query.contains(&r.timestamp))
            .cloned()
            .collect();

        if let Some(limit) = query.limit {
            let excess = readings.len().saturating_sub(limit);
            readings.drain(..excess);
        }
        Ok(readings)
    }

    async fn get_latest_reading(&self, device_id: &str) -> Result<Option<Reading>, StorageError> {
        let document = self.document().await?;
        Ok(Self::find(&document, device_id).and_then(|d| d.readings.last().cloned()))
    }

    async fn get_all_readings(&self) -> Result<Vec<DeviceReading>, StorageError> {
        let document = self.document().await?;
        Ok(document
            .devices
            .iter()
            .flat_map(|d| {
                let device = d.device();
                d.readings
                    .iter()
                    .map(move |r| DeviceReading::new(&device, r.clone()))
            })
            .collect())
    }

    async fn get_statistics(&self, device_id: Option<&str>) -> Result<Statistics, StorageError> {
        let document = self.document().await?;
        match device_id {
            Some(id) => Ok(Self::find(&document, id)
                .map(|d| Statistics::from_readings(&d.device_name, &d.readings))
                .unwrap_or_default()),
            None => Ok(Statistics::from_readings(
                ALL_DEVICES_NAME,
                document.devices.iter().flat_map(|d| d.readings.iter()),
            )),
        }
    }

    fn clear_cache(&self) {
        *self.document.write().unwrap_or_else(PoisonError::into_inner) = None;
        debug!("Cleared cached document for {}", self.path.display());
    }
}
