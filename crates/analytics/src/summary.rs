//! Summary Formatter
//!
//! Renders statistics and anomalies into the fixed-structure digest consumed
//! by the text generation service. Section order and labels are a contract:
//! the downstream prompt templates parse them.

use crate::anomaly::Anomaly;
use crate::AnalysisKind;
use chrono::NaiveDateTime;
use serde::Serialize;
use storage::timestamp;
use storage::{ReadingQuery, Statistics};

/// Returned instead of a digest when there is nothing to summarize
pub const NO_DATA: &str = "No data available";

/// Anomalies listed in a digest
pub const ANOMALY_EXCERPT: usize = 3;

/// A digest tagged with the analysis requested of it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Digest {
    pub kind: AnalysisKind,
    pub device_id: Option<String>,
    pub text: String,
}

/// Date-range annotation of a digest
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl DateRange {
    /// The window of `query`, if it has one
    pub fn of(query: &ReadingQuery) -> Option<Self> {
        query.has_window().then_some(Self {
            start: query.start,
            end: query.end,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SummaryFormatter {
    excerpt: usize,
}

impl Default for SummaryFormatter {
    fn default() -> Self {
        Self::with_excerpt(ANOMALY_EXCERPT)
    }
}

impl SummaryFormatter {
    pub fn with_excerpt(excerpt: usize) -> Self {
        Self { excerpt }
    }

    /// Render a digest. Empty statistics render as [`NO_DATA`].
    pub fn format(&self, stats: &Statistics, anomalies: &[Anomaly], range: Option<DateRange>) -> String {
        if stats.is_empty() {
            return NO_DATA.to_string();
        }

        let mut out = format!(
            "Temperature Data Summary:\n\
             ==================\n\
             Device name: {}\n\
             Total readings: {}\n\
             Average temperature: {:.2}°C\n\
             Minimum temperature: {:.2}°C\n\
             Maximum temperature: {:.2}°C\n\
             Temperature range: {:.2}°C\n\
             Normal status: {} times\n\
             Warning status: {} times\n\
             Alert status: {} times\n",
            stats.device_name,
            stats.total_readings,
            stats.avg_temperature,
            stats.min_temperature,
            stats.max_temperature,
            stats.temperature_range,
            stats.normal_count,
            stats.warning_count,
            stats.alert_count,
        );

        if !anomalies.is_empty() {
            out.push_str(&format!("\nAnomalies detected: {}\n", anomalies.len()));
            for a in anomalies.iter().take(self.excerpt) {
                out.push_str(&format!(
                    "  - {}: {:.2}°C ({})\n",
                    timestamp::to_iso(&a.timestamp),
                    a.temperature,
                    a.kind
                ));
            }
        }

        if let Some(range) = range {
            out.push_str("\nDate range:");
            if let Some(start) = range.start {
                out.push_str(&format!(" from {}", start.date()));
            }
            if let Some(end) = range.end {
                out.push_str(&format!(" to {}", end.date()));
            }
            out.push('\n');
        }

        out
    }
}
