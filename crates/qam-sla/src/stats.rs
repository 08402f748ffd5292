//! Descriptive statistics over metric samples.
//!
//! Computed only when at least three samples exist. Skewness is 0 for n < 3
//! and kurtosis 0 for n < 4 rather than dividing by zero. Outliers are flagged
//! at |z| > 2.0 and the trend direction comes from a least-squares slope over
//! the sample index.

use serde::{Deserialize, Serialize};

/// Minimum samples before a summary is produced.
pub const MIN_SAMPLES: usize = 3;

/// Z-score beyond which a sample counts as an outlier.
const OUTLIER_Z: f64 = 2.0;

/// Slope magnitude below which the trend reads as stable.
const TREND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

/// Summary statistics for one metric's recent samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub std_dev: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    /// Indices of samples with |z| > 2.0.
    pub outliers: Vec<usize>,
    /// Sign of the least-squares slope over sample order.
    pub trend: TrendDirection,
}

/// Summarize samples in arrival order. Returns `None` below [`MIN_SAMPLES`].
pub fn summarize(samples: &[f64]) -> Option<SampleSummary> {
    let n = samples.len();
    if n < MIN_SAMPLES {
        return None;
    }
    let nf = n as f64;

    let mean = samples.iter().sum::<f64>() / nf;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / nf;
    let std_dev = variance.sqrt();

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = percentile(&sorted, 50.0);

    let skewness = if n < 3 || std_dev == 0.0 {
        0.0
    } else {
        let m3 = samples.iter().map(|x| (x - mean).powi(3)).sum::<f64>() / nf;
        m3 / std_dev.powi(3)
    };
    let kurtosis = if n < 4 || std_dev == 0.0 {
        0.0
    } else {
        let m4 = samples.iter().map(|x| (x - mean).powi(4)).sum::<f64>() / nf;
        m4 / variance.powi(2) - 3.0
    };

    let outliers = if std_dev == 0.0 {
        Vec::new()
    } else {
        samples
            .iter()
            .enumerate()
            .filter(|(_, x)| ((*x - mean) / std_dev).abs() > OUTLIER_Z)
            .map(|(i, _)| i)
            .collect()
    };

    let slope = regression_slope(samples);
    let trend = if slope > TREND_EPSILON {
        TrendDirection::Improving
    } else if slope < -TREND_EPSILON {
        TrendDirection::Degrading
    } else {
        TrendDirection::Stable
    };

    Some(SampleSummary {
        count: n,
        mean,
        median,
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        std_dev,
        skewness,
        kurtosis,
        outliers,
        trend,
    })
}

/// Linear interpolation percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Least-squares slope of samples against their index.
fn regression_slope(samples: &[f64]) -> f64 {
    let n = samples.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = samples.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in samples.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
