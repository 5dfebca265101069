//! Batch aggregation entry point.
//!
//! Summary statistics and convergence diagnostics read the same immutable
//! column and run concurrently under `rayon::join`. Both must succeed for the
//! batch to produce a report.

use rayon::join;
use serde::{Deserialize, Serialize};

use crate::config::AggregationConfig;
use crate::convergence::{diagnose, ConvergenceReport, MIN_SPLIT_SAMPLE};
use crate::domain::{Realization, RealizationField};
use crate::error::AnalysisError;
use crate::summary::{summarize, SummaryReport};

/// Summary and convergence for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub summary: SummaryReport,
    pub convergence: ConvergenceReport,
}

/// Summary of one realization attribute across a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub field: RealizationField,
    pub summary: SummaryReport,
}

/// Summarize every realization attribute, in [`RealizationField::ALL`]
/// order. Unlike [`aggregate`] this needs only one realization.
pub fn summarize_fields(
    batch: &[Realization],
    confidence_level: f64,
) -> Result<Vec<FieldSummary>, AnalysisError> {
    RealizationField::ALL
        .iter()
        .map(|&field| {
            Ok(FieldSummary {
                field,
                summary: summarize(&field.column(batch), confidence_level)?,
            })
        })
        .collect()
}

/// Aggregate the configured field of a realization batch.
///
/// Configuration is validated before the batch is inspected, so an invalid
/// request never touches data.
///
/// A batch needs at least [`MIN_SPLIT_SAMPLE`] (4) realizations: split
/// R-hat compares two halves of at least two draws each. Batches of 2 or 3
/// fail with [`AnalysisError::InsufficientSample`] even though the summary
/// alone would be defined.
pub fn aggregate(
    batch: &[Realization],
    config: &AggregationConfig,
) -> Result<AggregateReport, AnalysisError> {
    config.validate()?;
    if batch.is_empty() {
        return Err(AnalysisError::InsufficientData {
            context: "realization batch",
            required: 1,
            actual: 0,
        });
    }
    aggregate_values(&config.field.column(batch), config)
}

/// Aggregate a raw numeric column. Same minimum sample as [`aggregate`].
pub fn aggregate_values(
    xs: &[f64],
    config: &AggregationConfig,
) -> Result<AggregateReport, AnalysisError> {
    config.validate()?;
    let (summary, convergence) = join(
        || summarize(xs, config.confidence_level),
        || diagnose(xs, config),
    );
    Ok(AggregateReport {
        summary: summary?,
        convergence: convergence?,
    })
}
