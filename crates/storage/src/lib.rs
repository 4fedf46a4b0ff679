//! Storage Layer
//!
//! Sensor devices and readings behind one read contract with two backends:
//! a JSON document loaded into memory, and a relational store reached through
//! a reconnecting, retrying connection manager.

mod config;
mod connection;
mod database;
mod driver;
mod file;
mod model;
mod repository;
mod row;
pub mod timestamp;

pub use config::DatabaseConfig;
pub use connection::{Connection, ConnectionManager, Connector, ManagedScope, DEFAULT_BACKOFF};
pub use database::{StoreRepository, DEFAULT_SNAPSHOT_LIMIT};
pub use driver::{SqlxConnection, SqlxConnector};
pub use file::FileRepository;
pub use model::{
    Device, DeviceDocument, DeviceReading, Document, Reading, ReadingQuery, ReadingStatus,
    Statistics, ALL_DEVICES_NAME,
};
pub use repository::{RecordRepository, SourceRepository};
pub use row::{Row, SqlValue};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// A connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),
    /// Server closed the session (MySQL 2006)
    #[error("Database server has gone away: {0}")]
    ServerGoneAway(String),
    /// Connection dropped mid-operation (MySQL 2013, socket reset, timeout)
    #[error("Lost connection to database: {0}")]
    ConnectionLost(String),
    /// Query rejected by the backend (syntax, constraint, auth, schema)
    #[error("Database error: {0}")]
    DatabaseError(String),
    /// A transient failure persisted through every attempt
    #[error("Operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },
    #[error("Data file not found: {0}")]
    SourceNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Column {column}: {reason}")]
    Decode { column: String, reason: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Lock error: {0}")]
    Lock(String),
}

impl StorageError {
    /// Whether reconnecting and retrying may clear the failure
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::ServerGoneAway(_) | StorageError::ConnectionLost(_)
        )
    }

    pub(crate) fn decode(column: &str, reason: impl Into<String>) -> Self {
        StorageError::Decode {
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StorageError::Lock(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::ServerGoneAway("x".into()).is_transient());
        assert!(StorageError::ConnectionLost("x".into()).is_transient());
        assert!(!StorageError::Connection("refused".into()).is_transient());
        assert!(!StorageError::DatabaseError("syntax".into()).is_transient());
    }

    #[test]
    fn test_exhausted_is_fatal() {
        let err = StorageError::RetriesExhausted {
            attempts: 3,
            source: Box::new(StorageError::ConnectionLost("reset".into())),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("3 attempts"));
    }
}
