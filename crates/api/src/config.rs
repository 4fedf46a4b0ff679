//! Application configuration
//!
//! Layered with the `config` crate: built-in defaults, then a YAML file
//! (`config/config.yaml`, or the path in `SENSOR_CONFIG`), then `SENSOR__*`
//! environment variables such as `SENSOR__SOURCE__BACKEND=database`.

use crate::error::ApiError;
use analytics::AnalyticsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use storage::{DatabaseConfig, FileRepository, SourceRepository, StorageError, StoreRepository};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config/config.yaml";

/// Environment variable naming an alternative configuration file
pub const CONFIG_FILE_ENV: &str = "SENSOR_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub database: DatabaseConfig,
    pub analytics: AnalyticsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Which repository backs the reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    File,
    Database,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub backend: Backend,
    /// Readings document for the file backend
    pub data_file: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            backend: Backend::File,
            data_file: PathBuf::from("data/temperature_data.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load from the default file location (or `SENSOR_CONFIG`) and environment
    pub fn load() -> Result<Self, ApiError> {
        let path = std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load with `path` as the file layer; a missing file is skipped
    pub fn load_from(path: &Path) -> Result<Self, ApiError> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("SENSOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.analytics.validate()?;
        Ok(config)
    }

    /// Build the configured repository. No connection is opened yet.
    pub fn repository(&self) -> Result<SourceRepository, StorageError> {
        match self.source.backend {
            Backend::File => Ok(FileRepository::new(&self.source.data_file).into()),
            Backend::Database => Ok(StoreRepository::connect(&self.database)?.into()),
        }
    }
}
