//! SummaryStatistics: mean, population standard deviation, nearest-rank
//! percentiles and a parametric confidence interval.
//!
//! Every percentile is read from one sorted copy.
//! The caller's slice is never reordered.

use serde::{Deserialize, Serialize};

use crate::distribution::two_sided_z;
use crate::error::{ensure_finite, AnalysisError};

/// Fractions reported in [`Percentiles`].
pub const PERCENTILE_FRACTIONS: [f64; 5] = [0.05, 0.25, 0.50, 0.75, 0.95];

/// Nearest-rank percentile set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// Read-only aggregate over one numeric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub n: usize,
    pub mean: f64,
    /// Population standard deviation (divides by n).
    pub std: f64,
    pub confidence_level: f64,
    /// `mean ± z(c)·std`.
    pub confidence_interval: (f64, f64),
    pub percentiles: Percentiles,
    pub min: f64,
    pub max: f64,
}

impl SummaryReport {
    /// Width of the parametric confidence interval.
    pub fn ci_width(&self) -> f64 {
        self.confidence_interval.1 - self.confidence_interval.0
    }
}

/// Summarize a non-empty sample at the given confidence level.
pub fn summarize(xs: &[f64], confidence_level: f64) -> Result<SummaryReport, AnalysisError> {
    let z = two_sided_z(confidence_level)?;
    if xs.is_empty() {
        return Err(AnalysisError::InsufficientData {
            context: "summary statistics",
            required: 1,
            actual: 0,
        });
    }

    let sorted = sorted_copy(xs);
    let n = sorted.len();
    let min = sorted[0];
    let max = sorted[n - 1];

    let (mean, std) = if min == max {
        // Degenerate sample: report the value exactly instead of sum/n.
        (ensure_finite("mean", min)?, 0.0)
    } else {
        let (mean, std) = moments(xs);
        (ensure_finite("mean", mean)?, ensure_finite("std", std)?)
    };

    let [p5, p25, p50, p75, p95] = PERCENTILE_FRACTIONS.map(|f| nearest_rank(&sorted, f));
    let percentiles = Percentiles {
        p5,
        p25,
        p50,
        p75,
        p95,
    };

    let half_width = z * std;
    let confidence_interval = (
        ensure_finite("confidence_interval", mean - half_width)?,
        ensure_finite("confidence_interval", mean + half_width)?,
    );

    Ok(SummaryReport {
        n,
        mean,
        std,
        confidence_level,
        confidence_interval,
        percentiles,
        min,
        max,
    })
}

/// Arithmetic mean. `None` for an empty slice.
pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(moments(xs).0)
    }
}

/// Population standard deviation, `sqrt(Σ(x - mean)² / n)`. `None` for an
/// empty slice; exactly 0 when all values are equal.
pub fn population_std(xs: &[f64]) -> Option<f64> {
    let first = *xs.first()?;
    if xs.iter().all(|&x| x == first) {
        return Some(0.0);
    }
    Some(moments(xs).1)
}

/// Nearest-rank percentile: `sorted[floor(f·n)]`, index clamped to `[0, n-1]`.
///
/// `sorted` must be ascending and non-empty.
pub fn nearest_rank(sorted: &[f64], fraction: f64) -> f64 {
    debug_assert!(!sorted.is_empty(), "nearest_rank on empty slice");
    let n = sorted.len();
    let idx = (fraction * n as f64).floor();
    let idx = if idx <= 0.0 { 0 } else { (idx as usize).min(n - 1) };
    sorted[idx]
}

/// Equal-tailed interval `[q(α/2), q(1-α/2)]` of a sorted sample, read by
/// nearest rank.
pub fn quantile_range(sorted: &[f64], confidence_level: f64) -> (f64, f64) {
    let tail = (1.0 - confidence_level) / 2.0;
    (nearest_rank(sorted, tail), nearest_rank(sorted, 1.0 - tail))
}

/// Ascending copy ordered by `f64::total_cmp`.
pub(crate) fn sorted_copy(xs: &[f64]) -> Vec<f64> {
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Magnitudes inside this band are summed and squared unscaled.
const SAFE_MAGNITUDE: (f64, f64) = (1e-150, 1e150);

/// Power of two near the largest magnitude, or 1.0 when no rescaling is
/// needed. Dividing by a power of two is exact for normal floats.
fn moment_scale(xs: &[f64]) -> f64 {
    let max_abs = xs.iter().fold(0.0_f64, |m, &x| m.max(x.abs()));
    let in_band = (SAFE_MAGNITUDE.0..=SAFE_MAGNITUDE.1).contains(&max_abs);
    if !max_abs.is_finite() || max_abs < f64::MIN_POSITIVE || in_band {
        return 1.0;
    }
    2f64.powi(max_abs.log2().floor() as i32)
}

/// Mean and population standard deviation of a non-empty slice. NaN or
/// infinite inputs propagate into the result.
fn moments(xs: &[f64]) -> (f64, f64) {
    let scale = moment_scale(xs);
    let n = xs.len() as f64;
    let mean = xs.iter().map(|&x| x / scale).sum::<f64>() / n;
    let variance = xs.iter().map(|&x| (x / scale - mean).powi(2)).sum::<f64>() / n;
    (mean * scale, variance.sqrt() * scale)
}
