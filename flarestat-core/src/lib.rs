//! flarestat core: statistical aggregation for Monte Carlo detection batches.
//!
//! This crate is pure computation over in-memory batches:
//! - Summary statistics (mean, population std, nearest-rank percentiles, parametric CI)
//! - Convergence diagnostics (ESS, R-hat, bootstrap CI, permutation test)
//! - Comparative analysis (baseline vs treatment, fold stability, augmentation gains)
//! - Validated analysis configuration
//!
//! It performs no I/O beyond loading a config file. Fetching or generating
//! batches lives in `flarestat-runner`.

pub mod aggregate;
pub mod comparison;
pub mod config;
pub mod convergence;
pub mod distribution;
pub mod domain;
pub mod error;
pub mod rng;
pub mod summary;

pub use aggregate::{aggregate, aggregate_values, summarize_fields, AggregateReport, FieldSummary};
pub use comparison::{
    assess_sufficiency, augmentation_report, compare, cross_validation_report, stability_index,
    AugmentationReport, ComparisonReport, CrossValidationReport, SufficiencyAssessment,
};
pub use config::{ActivityLevel, AggregationConfig, AnalysisConfig, ConfigError};
pub use convergence::{diagnose, ConvergenceReport, PermutationTest};
pub use domain::{AugmentationRun, Fold, FoldMetric, Metric, MetricSet, Realization, RealizationField};
pub use error::AnalysisError;
pub use summary::{summarize, Percentiles, SummaryReport};
