//! Sensor Analytics
//!
//! Tabular views, z-score anomaly detection, trend estimation and text
//! digests over any `RecordRepository`.

mod anomaly;
mod engine;
mod overview;
mod statistics;
mod summary;
mod table;
mod trend;

pub use anomaly::{Anomaly, AnomalyKind};
pub use engine::{AnalyticsConfig, AnalyticsEngine};
pub use overview::{AnalysisKind, ChartSeries, DeviceOverview, DeviceSummary};
pub use statistics::{moving_average, round2, SeriesStats};
pub use summary::{DateRange, Digest, SummaryFormatter, ANOMALY_EXCERPT, NO_DATA};
pub use table::{ReadingTable, TableRow};
pub use trend::{TrendAnalysis, TrendDirection};

use storage::StorageError;
use thiserror::Error;

/// Analytics errors
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Anomaly threshold must be a non-negative number, got {0}")]
    InvalidThreshold(f64),
    #[error("Trend window must be at least 1, got {0}")]
    InvalidWindow(usize),
    #[error("Unknown analysis kind: {0}")]
    UnknownAnalysisKind(String),
}
