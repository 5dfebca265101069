//! Error taxonomy shared by every aggregation entry point.
//!
//! All variants are raised synchronously to the immediate caller. The engine
//! never retries and never substitutes a default value for a failed statistic.

use thiserror::Error;

/// Errors from the statistical core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Empty or too-small input for a statistic that needs at least one value.
    #[error("insufficient data for {context}: {actual} values < minimum {required}")]
    InsufficientData {
        context: &'static str,
        required: usize,
        actual: usize,
    },

    /// Batch too small for a convergence diagnostic.
    #[error("insufficient sample for {context}: batch of {actual} < minimum {required}")]
    InsufficientSample {
        context: &'static str,
        required: usize,
        actual: usize,
    },

    /// A configuration value is outside its accepted range.
    #[error("invalid configuration: {field} = {value} (expected {expected})")]
    InvalidConfiguration {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// A computed statistic came out NaN or infinite.
    #[error("non-finite result: {statistic} = {value}")]
    NonFiniteResult { statistic: &'static str, value: f64 },

    /// A ratio whose denominator (the baseline) is zero.
    #[error("undefined ratio: baseline {metric} is zero")]
    UndefinedRatio { metric: String },
}

impl AnalysisError {
    pub(crate) fn invalid(
        field: &'static str,
        value: impl ToString,
        expected: &'static str,
    ) -> Self {
        Self::InvalidConfiguration {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Return `value` if finite, otherwise a `NonFiniteResult` naming the statistic.
pub(crate) fn ensure_finite(statistic: &'static str, value: f64) -> Result<f64, AnalysisError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AnalysisError::NonFiniteResult { statistic, value })
    }
}
