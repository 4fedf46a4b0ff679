//! Series Statistics

use serde::Serialize;

/// Descriptive statistics for a value series
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesStats {
    /// Number of values
    pub count: usize,
    /// Mean value
    pub mean: f64,
    /// Sample standard deviation (n - 1); 0 for fewer than two values
    pub std_dev: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// max - min
    pub range: f64,
}

impl SeriesStats {
    /// Compute statistics from a slice of values
    pub fn compute(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        let max = values.iter().cloned().fold(f64::MIN, f64::max);

        // A constant series is exactly zero-variance, whatever the rounding in `mean`
        let std_dev = if values.len() >= 2 && max > min {
            let m2: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
            (m2 / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        Self {
            count: values.len(),
            mean,
            std_dev,
            min,
            max,
            range: max - min,
        }
    }

    /// Whether z-scores are defined for this series
    pub fn has_variance(&self) -> bool {
        self.std_dev > 0.0
    }
}

/// Trailing moving average with a minimum of one period.
///
/// Element `i` is the mean of `values[i + 1 - window ..= i]`, clipped at the
/// start of the series.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;

    for (i, &v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        let periods = (i + 1).min(window);
        out.push(sum / periods as f64);
    }
    out
}

/// Round to two decimal places for presentation
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
