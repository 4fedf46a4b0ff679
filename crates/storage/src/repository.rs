//! Record Repository Contract
//!
//! Consumers depend only on this read contract. Readings always come back
//! in ascending timestamp order, whichever backend serves them.

use crate::database::StoreRepository;
use crate::driver::SqlxConnector;
use crate::file::FileRepository;
use crate::model::{Device, DeviceReading, Reading, ReadingQuery, Statistics};
use crate::StorageError;

/// Read capability shared by the file-backed and store-backed variants
///
/// Unknown devices are not errors: lookups return `None`, empty lists or
/// `Statistics::empty()`. Backend failures propagate unchanged.
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    async fn get_all_devices(&self) -> Result<Vec<Device>, StorageError>;

    async fn get_device_by_id(&self, device_id: &str) -> Result<Option<Device>, StorageError>;

    /// Readings for one device, ascending, filtered by `query`
    async fn get_device_readings(
        &self,
        device_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<Reading>, StorageError>;

    async fn get_latest_reading(&self, device_id: &str) -> Result<Option<Reading>, StorageError>;

    /// Every reading of every device, each tagged with its device
    async fn get_all_readings(&self) -> Result<Vec<DeviceReading>, StorageError>;

    /// Statistics for one device, or across all devices when `None`
    async fn get_statistics(&self, device_id: Option<&str>) -> Result<Statistics, StorageError>;

    /// Drop cached data so the next call reads the backend again
    fn clear_cache(&self);
}

/// Backend chosen at startup
pub enum SourceRepository {
    File(FileRepository),
    Store(StoreRepository<SqlxConnector>),
}

impl SourceRepository {
    pub fn backend_name(&self) -> &'static str {
        match self {
            SourceRepository::File(_) => "file",
            SourceRepository::Store(_) => "database",
        }
    }
}

impl From<FileRepository> for SourceRepository {
    fn from(repo: FileRepository) -> Self {
        SourceRepository::File(repo)
    }
}

impl From<StoreRepository<SqlxConnector>> for SourceRepository {
    fn from(repo: StoreRepository<SqlxConnector>) -> Self {
        SourceRepository::Store(repo)
    }
}

impl RecordRepository for SourceRepository {
    async fn get_all_devices(&self) -> Result<Vec<Device>, StorageError> {
        match self {
            SourceRepository::File(r) => r.get_all_devices().await,
            SourceRepository::Store(r) => r.get_all_devices().await,
        }
    }

    async fn get_device_by_id(&self, device_id: &str) -> Result<Option<Device>, StorageError> {
        match self {
            SourceRepository::File(r) => r.get_device_by_id(device_id).await,
            SourceRepository::Store(r) => r.get_device_by_id(device_id).await,
        }
    }

    async fn get_device_readings(
        &self,
        device_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<Reading>, StorageError> {
        match self {
            SourceRepository::File(r) => r.get_device_readings(device_id, query).await,
            SourceRepository::Store(r) => r.get_device_readings(device_id, query).await,
        }
    }

    async fn get_latest_reading(&self, device_id: &str) -> Result<Option<Reading>, StorageError> {
        match self {
            SourceRepository::File(r) => r.get_latest_reading(device_id).await,
            SourceRepository::Store(r) => r.get_latest_reading(device_id).await,
        }
    }

    async fn get_all_readings(&self) -> Result<Vec<DeviceReading>, StorageError> {
        match self {
            SourceRepository::File(r) => r.get_all_readings().await,
            SourceRepository::Store(r) => r.get_all_readings().await,
        }
    }

    async fn get_statistics(&self, device_id: Option<&str>) -> Result<Statistics, StorageError> {
        match self {
            SourceRepository::File(r) => r.get_statistics(device_id).await,
            SourceRepository::Store(r) => r.get_statistics(device_id).await,
        }
    }

    fn clear_cache(&self) {
        match self {
            SourceRepository::File(r) => r.clear_cache(),
            SourceRepository::Store(r) => r.clear_cache(),
        }
    }
}
