//! flarestat runner: analysis orchestration on top of `flarestat-core`.
//!
//! This crate provides:
//! - Batch sources (injected detector, fixed batches, seeded synthetic generator)
//! - Bounded-timeout source resolution with degraded-outcome tagging
//! - The analysis state machine tying summary, diagnostics and comparison together
//! - Posterior chain analysis for Bayesian requests
//! - JSON report and realization CSV export

pub mod bayesian;
pub mod orchestrator;
pub mod report;
pub mod source;

pub use bayesian::{analyze_posterior, ParameterChains, ParameterPosterior, PosteriorReport};
pub use orchestrator::{
    run_all, Analysis, AnalysisKind, AnalysisRequest, AnalysisState, RunError, Sources,
    TransitionError,
};
pub use report::{
    export_json, export_realizations_csv, import_json, save_realizations_csv, save_report,
    AnalysisReport, ReportBody, SCHEMA_VERSION,
};
pub use source::{
    resolve, BatchSource, DataSource, FixedBatch, Outcome, Resolved, SourceError, SourcePolicy,
    SyntheticGenerator,
};
