//! Short-horizon trend estimation

use crate::statistics::{moving_average, round2, SeriesStats};
use serde::Serialize;
use std::fmt;

/// Direction over the most recent window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    /// Fewer than two values, or last equals first
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Rising => "rising",
            TrendDirection::Falling => "falling",
            TrendDirection::Stable => "stable",
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trend record for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendAnalysis {
    pub device_id: String,
    pub trend: TrendDirection,
    /// (last - first) / window count over the recent window, 2 decimals
    pub trend_rate: f64,
    /// Most recent temperature
    pub current_temp: f64,
    /// Mean over the whole series
    pub avg_temp: f64,
    /// Sample standard deviation over the whole series
    pub volatility: f64,
    /// Trailing moving average, one value per reading
    pub moving_average: Vec<f64>,
}

/// Analyze an ascending temperature series. `None` for an empty series.
pub fn analyze(device_id: &str, values: &[f64], window_size: usize) -> Option<TrendAnalysis> {
    let current_temp = *values.last()?;
    let window_size = window_size.max(1);
    let recent = &values[values.len().saturating_sub(window_size)..];

    let (trend, trend_rate) = match (recent.first(), recent.last()) {
        (Some(&first), Some(&last)) if recent.len() >= 2 => {
            let trend = if last > first {
                TrendDirection::Rising
            } else if last < first {
                TrendDirection::Falling
            } else {
                TrendDirection::Stable
            };
            (trend, round2((last - first) / recent.len() as f64))
        }
        _ => (TrendDirection::Stable, 0.0),
    };

    let stats = SeriesStats::compute(values);
    Some(TrendAnalysis {
        device_id: device_id.to_string(),
        trend,
        trend_rate,
        current_temp,
        avg_temp: stats.mean,
        volatility: stats.std_dev,
        moving_average: moving_average(values, window_size),
    })
}
