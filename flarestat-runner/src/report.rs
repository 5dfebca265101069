//! Analysis reports and export as JSON and CSV.
//!
//! Provides two export formats:
//! - **JSON**: the full report with schema versioning and provenance
//! - **CSV**: the realization batch behind a background analysis
//!
//! Persisted reports carry a `schema_version` field. Newer versions are
//! rejected on load.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flarestat_core::comparison::{AugmentationReport, CrossValidationReport, SufficiencyAssessment};
use flarestat_core::{
    AggregateReport, AnalysisConfig, ConvergenceReport, FieldSummary, Realization,
    RealizationField, SummaryReport,
};

use crate::bayesian::PosteriorReport;
use crate::orchestrator::AnalysisKind;
use crate::source::DataSource;

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Result of one completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub request_id: String,
    pub kind: AnalysisKind,
    /// Provenance of the analyzed batch.
    pub source: DataSource,
    /// Set when the primary source failed and a fallback batch was used.
    pub degraded_reason: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub config: AnalysisConfig,
    pub body: ReportBody,
}

impl AnalysisReport {
    pub fn is_degraded(&self) -> bool {
        self.degraded_reason.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportBody {
    Background(BackgroundReport),
    CrossValidation(CrossValidationSummary),
    Augmentation(AugmentationSummary),
    Bayesian(PosteriorReport),
}

/// Monte Carlo background characterization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundReport {
    pub field: RealizationField,
    pub realizations: usize,
    /// Mean detections per hour of observation across the batch.
    pub detection_rate_per_hour: f64,
    /// Summary and convergence of `field`.
    pub aggregate: AggregateReport,
    /// Summaries of every realization attribute, in `RealizationField::ALL`
    /// order.
    pub fields: Vec<FieldSummary>,
    pub sufficiency: SufficiencyAssessment,
}

impl BackgroundReport {
    pub fn field_summary(&self, field: RealizationField) -> Option<&SummaryReport> {
        self.fields
            .iter()
            .find(|f| f.field == field)
            .map(|f| &f.summary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationSummary {
    pub report: CrossValidationReport,
    /// Diagnostics over validation scores; `None` for fewer than 4 folds.
    pub convergence: Option<ConvergenceReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationSummary {
    pub report: AugmentationReport,
    /// Diagnostics over the post-augmentation primary metric; `None` for
    /// fewer than 4 runs.
    pub convergence: Option<ConvergenceReport>,
}

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(report: &AnalysisReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize AnalysisReport to JSON")
}

/// Deserialize a report, rejecting schema versions newer than this build.
pub fn import_json(json: &str) -> Result<AnalysisReport> {
    let report: AnalysisReport =
        serde_json::from_str(json).context("failed to deserialize AnalysisReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

pub fn save_report(report: &AnalysisReport, path: &Path) -> Result<()> {
    let json = export_json(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report {}", path.display()))
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Export a realization batch as CSV, one row per realization.
///
/// Columns: id, background_level, detection_count, confidence,
/// energy_estimate, false_positive_rate, true_positive_rate, processing_time
pub fn export_realizations_csv(batch: &[Realization]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for realization in batch {
        wtr.serialize(realization)
            .with_context(|| format!("failed to write realization {}", realization.id))?;
    }
    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

pub fn save_realizations_csv(batch: &[Realization], path: &Path) -> Result<()> {
    let csv = export_realizations_csv(batch)?;
    std::fs::write(path, csv)
        .with_context(|| format!("failed to write realizations CSV {}", path.display()))
}
