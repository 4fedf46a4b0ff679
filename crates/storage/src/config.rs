//! Database connection configuration

use crate::StorageError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relational store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub charset: String,
    /// Connect timeout (seconds)
    pub connect_timeout: u64,
    /// Per-query read timeout (seconds)
    pub read_timeout: u64,
    /// Per-statement write timeout (seconds)
    pub write_timeout: u64,
    /// Attempts per operation, including the first
    pub max_retries: u32,
    /// Full connection URL; overrides the fields above when set
    pub url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "edge-llm".to_string(),
            password: "edge-llm".to_string(),
            database: "edge-llm".to_string(),
            charset: "utf8mb4".to_string(),
            connect_timeout: 10,
            read_timeout: 30,
            write_timeout: 30,
            max_retries: 3,
            url: None,
        }
    }
}

impl DatabaseConfig {
    /// Config pointing at an explicit URL, other settings default
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Connection URL understood by sqlx
    pub fn connection_url(&self) -> Result<String, StorageError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        if self.host.is_empty() || self.database.is_empty() {
            return Err(StorageError::Config(
                "database host and name must be set".to_string(),
            ));
        }
        Ok(format!(
            "mysql://{}:{}@{}:{}/{}?charset={}",
            urlencoding::encode(&self.user),
            urlencoding::encode(&self.password),
            self.host,
            self.port,
            urlencoding::encode(&self.database),
            urlencoding::encode(&self.charset),
        ))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }
}
