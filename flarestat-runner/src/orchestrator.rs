//! Analysis orchestrator: one request from batch to report.
//!
//! Each [`Analysis`] moves through `Pending → Running → {Completed, Failed}`.
//! The config is validated before any batch is requested. Summary and
//! diagnostics run concurrently under `rayon::join`; the comparative stage
//! consumes both. The first error fails the analysis and is kept for
//! inspection.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rayon::join;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use flarestat_core::comparison::{assess_sufficiency, augmentation_report, cross_validation_report};
use flarestat_core::convergence::{diagnose, MIN_SPLIT_SAMPLE};
use flarestat_core::{
    aggregate, summarize_fields, AggregationConfig, AnalysisConfig, AnalysisError,
    ConvergenceReport, FoldMetric, Realization,
};

use crate::bayesian::analyze_posterior;
use crate::report::{
    AnalysisReport, AugmentationSummary, BackgroundReport, CrossValidationSummary, ReportBody,
    SCHEMA_VERSION,
};
use crate::source::{
    resolve, BatchSource, DataSource, Resolved, SourceError, SourcePolicy, SyntheticGenerator,
};

// ─── State machine ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AnalysisState {
    pub fn can_transition_to(self, next: AnalysisState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal analysis transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: AnalysisState,
    pub to: AnalysisState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Background,
    CrossValidation,
    Augmentation,
    Bayesian,
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Background => "background",
            Self::CrossValidation => "cross_validation",
            Self::Augmentation => "augmentation",
            Self::Bayesian => "bayesian",
        })
    }
}

/// Errors from running an analysis.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

// ─── Requests ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Stable id: BLAKE3 over kind and config.
    pub id: String,
    pub kind: AnalysisKind,
    pub config: AnalysisConfig,
}

impl AnalysisRequest {
    pub fn new(kind: AnalysisKind, config: AnalysisConfig) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.to_string().as_bytes());
        // Config is plain data; serialization cannot fail.
        if let Ok(bytes) = serde_json::to_vec(&config) {
            hasher.update(&bytes);
        }
        let hex = hasher.finalize().to_hex().to_string();
        let id = hex[..16].to_string();
        Self { id, kind, config }
    }
}

/// Where an analysis pulls its batches from.
#[derive(Clone)]
pub struct Sources {
    pub primary: Option<Arc<dyn BatchSource>>,
    pub fallback: Arc<dyn BatchSource>,
    pub policy: SourcePolicy,
}

impl Sources {
    /// Primary source with synthetic fallback under the default policy.
    pub fn new(primary: Option<Arc<dyn BatchSource>>) -> Self {
        Self {
            primary,
            fallback: Arc::new(SyntheticGenerator::new()),
            policy: SourcePolicy::default(),
        }
    }

    /// Synthetic data only, reported as degraded.
    pub fn synthetic() -> Self {
        Self::new(None)
    }

    pub fn with_policy(mut self, policy: SourcePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn fetch<T, F>(&self, fetch: F) -> Result<Resolved<T>, SourceError>
    where
        T: Send + 'static,
        F: Fn(&dyn BatchSource) -> Result<T, SourceError> + Clone + Send + 'static,
    {
        resolve(self.primary.clone(), self.fallback.as_ref(), &self.policy, fetch)
    }
}

impl fmt::Debug for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sources")
            .field("primary", &self.primary.as_ref().map(|s| s.name().to_string()))
            .field("fallback", &self.fallback.name())
            .field("policy", &self.policy)
            .finish()
    }
}

// ─── Analysis ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Analysis {
    request: AnalysisRequest,
    state: AnalysisState,
    report: Option<AnalysisReport>,
    error: Option<RunError>,
    realizations: Vec<Realization>,
}

struct Computed {
    body: ReportBody,
    resolved_source: DataSource,
    degraded_reason: Option<String>,
}

impl Analysis {
    pub fn new(request: AnalysisRequest) -> Self {
        Self {
            request,
            state: AnalysisState::Pending,
            report: None,
            error: None,
            realizations: Vec::new(),
        }
    }

    pub fn request(&self) -> &AnalysisRequest {
        &self.request
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    pub fn report(&self) -> Option<&AnalysisReport> {
        self.report.as_ref()
    }

    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    /// Realization batch of a completed background analysis, kept for export.
    pub fn realizations(&self) -> &[Realization] {
        &self.realizations
    }

    fn transition(&mut self, next: AnalysisState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Run the analysis to a terminal state.
    ///
    /// Only a `Pending` analysis can run; any other state returns a
    /// [`TransitionError`] and leaves the analysis untouched.
    pub fn run(&mut self, sources: &Sources) -> Result<&AnalysisReport, RunError> {
        self.transition(AnalysisState::Running)?;
        info!(id = %self.request.id, kind = %self.request.kind, "analysis started");

        match self.execute(sources) {
            Ok(computed) => {
                self.transition(AnalysisState::Completed)?;
                if let Some(reason) = &computed.degraded_reason {
                    warn!(id = %self.request.id, %reason, "analysis completed on fallback data");
                } else {
                    info!(id = %self.request.id, "analysis completed");
                }
                let report = AnalysisReport {
                    schema_version: SCHEMA_VERSION,
                    request_id: self.request.id.clone(),
                    kind: self.request.kind,
                    source: computed.resolved_source,
                    degraded_reason: computed.degraded_reason,
                    generated_at: Utc::now(),
                    config: self.request.config.clone(),
                    body: computed.body,
                };
                Ok(self.report.insert(report))
            }
            Err(e) => {
                self.transition(AnalysisState::Failed)?;
                warn!(id = %self.request.id, error = %e, "analysis failed");
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn execute(&mut self, sources: &Sources) -> Result<Computed, RunError> {
        let config = self.request.config.clone();
        config.validate()?;
        let agg = config.aggregation();

        match self.request.kind {
            AnalysisKind::Background => {
                let resolved = sources.fetch({
                    let cfg = config.clone();
                    move |s: &dyn BatchSource| s.realizations(&cfg)
                })?;
                let batch = resolved.outcome.value();
                let (aggregate, fields) = join(
                    || aggregate(batch, &agg),
                    || summarize_fields(batch, agg.confidence_level),
                );
                let aggregate = aggregate?;
                let sufficiency = assess_sufficiency(&aggregate.summary, &aggregate.convergence);
                let detections: f64 = batch.iter().map(|r| f64::from(r.detection_count)).sum();
                let body = ReportBody::Background(BackgroundReport {
                    field: agg.field,
                    realizations: batch.len(),
                    detection_rate_per_hour: detections
                        / (batch.len() as f64 * f64::from(config.duration_hours)),
                    aggregate,
                    fields: fields?,
                    sufficiency,
                });
                let computed = computed(body, &resolved);
                self.realizations = resolved.outcome.into_value();
                Ok(computed)
            }
            AnalysisKind::CrossValidation => {
                let resolved = sources.fetch({
                    let cfg = config.clone();
                    move |s: &dyn BatchSource| s.folds(&cfg)
                })?;
                let folds = resolved.outcome.value();
                let val_scores = FoldMetric::ValScore.column(folds);
                let (report, convergence) = join(
                    || cross_validation_report(folds, config.confidence_level),
                    || optional_diagnostics(&val_scores, &agg),
                );
                let body = ReportBody::CrossValidation(CrossValidationSummary {
                    report: report?,
                    convergence: convergence?,
                });
                Ok(computed(body, &resolved))
            }
            AnalysisKind::Augmentation => {
                let resolved = sources.fetch({
                    let cfg = config.clone();
                    move |s: &dyn BatchSource| s.augmentation_runs(&cfg)
                })?;
                let runs = resolved.outcome.value();
                let primary = config.primary_metric;
                let after: Vec<f64> = runs.iter().map(|r| primary.extract(&r.after)).collect();
                let (report, convergence) = join(
                    || augmentation_report(runs, primary, &agg),
                    || optional_diagnostics(&after, &agg),
                );
                let body = ReportBody::Augmentation(AugmentationSummary {
                    report: report?,
                    convergence: convergence?,
                });
                Ok(computed(body, &resolved))
            }
            AnalysisKind::Bayesian => {
                let resolved = sources.fetch({
                    let cfg = config.clone();
                    move |s: &dyn BatchSource| s.posterior(&cfg)
                })?;
                let posterior = analyze_posterior(resolved.outcome.value(), config.confidence_level)?;
                Ok(computed(ReportBody::Bayesian(posterior), &resolved))
            }
        }
    }
}

fn computed<T>(body: ReportBody, resolved: &Resolved<T>) -> Computed {
    Computed {
        body,
        resolved_source: resolved.source,
        degraded_reason: resolved.outcome.degraded_reason().map(str::to_string),
    }
}

/// Diagnostics for small batches (folds, augmentation runs): skipped below
/// the split R-hat minimum instead of failing the analysis.
fn optional_diagnostics(
    xs: &[f64],
    config: &AggregationConfig,
) -> Result<Option<ConvergenceReport>, AnalysisError> {
    if xs.len() < MIN_SPLIT_SAMPLE {
        return Ok(None);
    }
    diagnose(xs, config).map(Some)
}

/// Run independent requests in parallel. Results keep request order.
pub fn run_all(requests: Vec<AnalysisRequest>, sources: &Sources) -> Vec<Analysis> {
    requests
        .into_par_iter()
        .map(|request| {
            let mut analysis = Analysis::new(request);
            // The outcome is recorded on the analysis itself.
            let _ = analysis.run(sources);
            analysis
        })
        .collect()
}
