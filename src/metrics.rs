//! Closed catalog of pairwise image metrics.
//!
//! Every metric is a pure function of two equally shaped grids, looked up through
//! [`Metric::function`]. Results are either one scalar or a per-pixel grid. Degenerate inputs
//! (e.g. correlation of a constant image) yield non-finite values rather than errors; the
//! similarity engine filters those out.

use dataset_common::{DatasetError, Grid, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::information::{continuous_mutual_information, normalized_mutual_information};

const HISTOGRAM_BINS: usize = 99;
const SSIM_WINDOW: usize = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;
/// Noise seed of the continuous MI metric; fixed so the metric stays a pure function.
const MI_SEED: u64 = 0;

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Scalar(f64),
    Map(Grid),
}

impl MetricValue {
    pub fn is_finite(&self) -> bool {
        match self {
            MetricValue::Scalar(v) => v.is_finite(),
            MetricValue::Map(grid) => grid.is_finite(),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            MetricValue::Map(_) => None,
        }
    }
}

pub type MetricFn = fn(&Grid, &Grid) -> MetricValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    AbsoluteDifference,
    HistogramCorrelation,
    Ssim,
    MeanAbsoluteError,
    RootMeanSquaredError,
    MaxAbsoluteError,
    Correlation,
    Dice,
    MutualInformation,
    ContinuousMutualInformation,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::AbsoluteDifference,
        Metric::HistogramCorrelation,
        Metric::Ssim,
        Metric::MeanAbsoluteError,
        Metric::RootMeanSquaredError,
        Metric::MaxAbsoluteError,
        Metric::Correlation,
        Metric::Dice,
        Metric::MutualInformation,
        Metric::ContinuousMutualInformation,
    ];

    /// Stable human-readable label, used in artifact names and the scalar table.
    pub fn label(self) -> &'static str {
        match self {
            Metric::AbsoluteDifference => "image absolute difference",
            Metric::HistogramCorrelation => "histogram correlation",
            Metric::Ssim => "ssim index",
            Metric::MeanAbsoluteError => "mean absolute error",
            Metric::RootMeanSquaredError => "root mean squared error",
            Metric::MaxAbsoluteError => "max absolute error",
            Metric::Correlation => "correlation",
            Metric::Dice => "sørensen–Dice coefficient",
            Metric::MutualInformation => "mutual information",
            Metric::ContinuousMutualInformation => "continuous mutual information",
        }
    }

    /// Name used in configuration files.
    pub fn config_name(self) -> &'static str {
        match self {
            Metric::AbsoluteDifference => "absolute_difference",
            Metric::HistogramCorrelation => "histogram_correlation",
            Metric::Ssim => "ssim",
            Metric::MeanAbsoluteError => "mean_absolute_error",
            Metric::RootMeanSquaredError => "root_mean_squared_error",
            Metric::MaxAbsoluteError => "max_absolute_error",
            Metric::Correlation => "correlation",
            Metric::Dice => "dice",
            Metric::MutualInformation => "mutual_information",
            Metric::ContinuousMutualInformation => "continuous_mutual_information",
        }
    }

    pub fn function(self) -> MetricFn {
        match self {
            Metric::AbsoluteDifference => absolute_difference,
            Metric::HistogramCorrelation => histogram_correlation,
            Metric::Ssim => ssim,
            Metric::MeanAbsoluteError => mean_absolute_error,
            Metric::RootMeanSquaredError => root_mean_squared_error,
            Metric::MaxAbsoluteError => max_absolute_error,
            Metric::Correlation => correlation,
            Metric::Dice => dice,
            Metric::MutualInformation => mutual_information,
            Metric::ContinuousMutualInformation => continuous_mi,
        }
    }

    /// Applies the metric after checking both grids have the same shape.
    pub fn evaluate(self, a: &Grid, b: &Grid) -> Result<MetricValue> {
        a.check_same_shape(b)?;
        Ok((self.function())(a, b))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Metric {
    type Err = DatasetError;

    /// Accepts the configuration name or the label.
    fn from_str(s: &str) -> Result<Self> {
        Metric::ALL
            .into_iter()
            .find(|m| m.config_name() == s || m.label() == s)
            .ok_or_else(|| DatasetError::UnknownMetric(s.to_string()))
    }
}

fn pairs<'a>(a: &'a Grid, b: &'a Grid) -> impl Iterator<Item = (f64, f64)> + 'a {
    a.as_slice().iter().copied().zip(b.as_slice().iter().copied())
}

/// Pearson correlation; NaN when either side has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    cov / (var_a * var_b).sqrt()
}

fn absolute_difference(a: &Grid, b: &Grid) -> MetricValue {
    let data = pairs(a, b).map(|(x, y)| (x - y).abs()).collect();
    match Grid::new(a.rows(), a.cols(), data) {
        Ok(grid) => MetricValue::Map(grid),
        Err(_) => MetricValue::Scalar(f64::NAN),
    }
}

/// Histograms over `[min, max + 1]` of both images, equal bins, then Pearson correlation.
fn histogram_correlation(a: &Grid, b: &Grid) -> MetricValue {
    let lo = a.min().min(b.min());
    let hi = a.max().max(b.max()) + 1.0;
    let width = (hi - lo) / HISTOGRAM_BINS as f64;
    let histogram = |grid: &Grid| {
        let mut counts = vec![0.0; HISTOGRAM_BINS];
        for &v in grid.as_slice() {
            let bin = (((v - lo) / width) as usize).min(HISTOGRAM_BINS - 1);
            counts[bin] += 1.0;
        }
        counts
    };
    MetricValue::Scalar(pearson(&histogram(a), &histogram(b)))
}

/// Mean structural similarity over every `7x7` window fully inside the grid (smaller grids use
/// the largest odd window that fits), with sample covariances and the joint data range.
fn ssim(a: &Grid, b: &Grid) -> MetricValue {
    let (rows, cols) = a.shape();
    let fit = SSIM_WINDOW.min(rows).min(cols);
    if fit < 3 {
        return MetricValue::Scalar(f64::NAN);
    }
    let win = if fit % 2 == 0 { fit - 1 } else { fit };
    let data_range = a.max().max(b.max()) - a.min().min(b.min());
    let c1 = (SSIM_K1 * data_range).powi(2);
    let c2 = (SSIM_K2 * data_range).powi(2);
    let np = (win * win) as f64;
    let cov_norm = np / (np - 1.0);

    let mut total = 0.0;
    let mut windows = 0usize;
    for r0 in 0..=rows - win {
        for c0 in 0..=cols - win {
            let (mut sa, mut sb, mut saa, mut sbb, mut sab) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for r in r0..r0 + win {
                for c in c0..c0 + win {
                    let (x, y) = (a.get(r, c), b.get(r, c));
                    sa += x;
                    sb += y;
                    saa += x * x;
                    sbb += y * y;
                    sab += x * y;
                }
            }
            let (ux, uy) = (sa / np, sb / np);
            let vx = cov_norm * (saa / np - ux * ux);
            let vy = cov_norm * (sbb / np - uy * uy);
            let vxy = cov_norm * (sab / np - ux * uy);
            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            windows += 1;
        }
    }
    MetricValue::Scalar(total / windows as f64)
}

fn mean_absolute_error(a: &Grid, b: &Grid) -> MetricValue {
    let sum: f64 = pairs(a, b).map(|(x, y)| (x - y).abs()).sum();
    MetricValue::Scalar(sum / a.len() as f64)
}

fn root_mean_squared_error(a: &Grid, b: &Grid) -> MetricValue {
    let sum: f64 = pairs(a, b).map(|(x, y)| (x - y).powi(2)).sum();
    MetricValue::Scalar((sum / a.len() as f64).sqrt())
}

fn max_absolute_error(a: &Grid, b: &Grid) -> MetricValue {
    MetricValue::Scalar(pairs(a, b).map(|(x, y)| (x - y).abs()).fold(f64::NAN, f64::max))
}

fn correlation(a: &Grid, b: &Grid) -> MetricValue {
    MetricValue::Scalar(pearson(a.as_slice(), b.as_slice()))
}

/// `2 * |equal elements| / (|a| + |b|)`.
fn dice(a: &Grid, b: &Grid) -> MetricValue {
    let equal = pairs(a, b).filter(|(x, y)| x == y).count() as f64;
    MetricValue::Scalar(2.0 * equal / (a.len() + b.len()) as f64)
}

fn mutual_information(a: &Grid, b: &Grid) -> MetricValue {
    MetricValue::Scalar(normalized_mutual_information(a.as_slice(), b.as_slice()))
}

fn continuous_mi(a: &Grid, b: &Grid) -> MetricValue {
    MetricValue::Scalar(continuous_mutual_information(a.as_slice(), b.as_slice(), MI_SEED).unwrap_or(f64::NAN))
}
