//! Integration tests for the analysis state machine across all analysis kinds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flarestat_core::{
    AnalysisConfig, AnalysisError, AugmentationRun, Fold, MetricSet, Realization,
    RealizationField,
};
use flarestat_runner::{
    run_all, Analysis, AnalysisKind, AnalysisRequest, AnalysisState, BatchSource, DataSource,
    FixedBatch, ParameterChains, ReportBody, RunError, SourceError, SourcePolicy, Sources,
};

fn quick_config() -> AnalysisConfig {
    AnalysisConfig {
        realizations: 300,
        bootstrap_samples: 200,
        permutation_samples: 200,
        ..Default::default()
    }
}

fn run(kind: AnalysisKind, config: AnalysisConfig, sources: &Sources) -> Analysis {
    let mut analysis = Analysis::new(AnalysisRequest::new(kind, config));
    let _ = analysis.run(sources);
    analysis
}

/// Counts calls so tests can prove a source was never consulted.
struct CountingSource {
    calls: AtomicUsize,
    inner: FixedBatch,
}

impl CountingSource {
    fn new(inner: FixedBatch) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            inner,
        }
    }

    fn bump(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl BatchSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    fn provenance(&self) -> DataSource {
        DataSource::Detector
    }

    fn realizations(&self, config: &AnalysisConfig) -> Result<Vec<Realization>, SourceError> {
        self.bump();
        self.inner.realizations(config)
    }

    fn folds(&self, config: &AnalysisConfig) -> Result<Vec<Fold>, SourceError> {
        self.bump();
        self.inner.folds(config)
    }

    fn augmentation_runs(
        &self,
        config: &AnalysisConfig,
    ) -> Result<Vec<AugmentationRun>, SourceError> {
        self.bump();
        self.inner.augmentation_runs(config)
    }

    fn posterior(&self, config: &AnalysisConfig) -> Result<Vec<ParameterChains>, SourceError> {
        self.bump();
        self.inner.posterior(config)
    }
}

fn fold(i: usize, val: f64) -> Fold {
    Fold {
        fold_index: i,
        train_score: 0.9,
        val_score: val,
        test_score: 0.84,
        precision: 0.8,
        recall: 0.78,
        f1: 0.79,
        auc: 0.9,
    }
}

// ─── Background ──────────────────────────────────────────────────────

#[test]
fn synthetic_background_completes_degraded() {
    let analysis = run(AnalysisKind::Background, quick_config(), &Sources::synthetic());
    assert_eq!(analysis.state(), AnalysisState::Completed);

    let report = analysis.report().unwrap();
    assert_eq!(report.source, DataSource::Synthetic);
    assert!(report.is_degraded());
    assert_eq!(analysis.realizations().len(), 300);

    let ReportBody::Background(body) = &report.body else {
        panic!("expected background body, got {:?}", report.body);
    };
    assert_eq!(body.realizations, 300);
    assert_eq!(body.aggregate.summary.n, 300);
    assert!(body.aggregate.convergence.converged);
    assert!(body.aggregate.convergence.effective_sample_size <= 300.0);
    assert!(body.detection_rate_per_hour > 0.0);
}

#[test]
fn detector_batch_completes_without_degradation() {
    let batch: Vec<Realization> = (1..=50)
        .map(|i| Realization {
            id: i,
            background_level: 0.1,
            detection_count: 3,
            confidence: 0.5 + (i % 10) as f64 * 0.04,
            energy_estimate: 1e28,
            false_positive_rate: 0.05,
            true_positive_rate: 0.9,
            processing_time: 0.2,
        })
        .collect();
    let detector = FixedBatch::new().with_realizations(batch).as_detector_output();
    let sources = Sources::new(Some(Arc::new(detector)));

    let analysis = run(AnalysisKind::Background, quick_config(), &sources);
    let report = analysis.report().unwrap();
    assert_eq!(report.source, DataSource::Detector);
    assert!(!report.is_degraded());
    assert_eq!(analysis.realizations().len(), 50);
}

#[test]
fn background_reports_every_realization_field() {
    let batch: Vec<Realization> = (1..=40)
        .map(|i| Realization {
            id: i,
            background_level: if i % 2 == 0 { 0.1 } else { 0.2 },
            detection_count: (i % 5) as u32,
            confidence: 0.5 + (i % 10) as f64 * 0.04,
            energy_estimate: 2e28,
            false_positive_rate: 0.05,
            true_positive_rate: 0.9,
            processing_time: 0.2,
        })
        .collect();
    let detector = FixedBatch::new().with_realizations(batch).as_detector_output();
    let sources = Sources::new(Some(Arc::new(detector)));

    let analysis = run(AnalysisKind::Background, quick_config(), &sources);
    let ReportBody::Background(body) = &analysis.report().unwrap().body else {
        panic!("expected background body");
    };

    let background = body.field_summary(RealizationField::BackgroundLevel).unwrap();
    assert!((background.mean - 0.15).abs() < 1e-12);
    assert!((background.std - 0.05).abs() < 1e-12);

    let detections = body.field_summary(RealizationField::DetectionCount).unwrap();
    assert!((detections.mean - 2.0).abs() < 1e-12);
    assert_eq!(detections.max, 4.0);

    let energy = body.field_summary(RealizationField::EnergyEstimate).unwrap();
    assert_eq!(energy.mean, 2e28);
    assert_eq!(energy.std, 0.0);

    // Diagnostics stay on the configured column.
    assert_eq!(body.field, RealizationField::Confidence);
    assert_eq!(
        &body.aggregate.summary,
        body.field_summary(RealizationField::Confidence).unwrap()
    );
    assert_eq!(body.fields.len(), RealizationField::ALL.len());
}

#[test]
fn invalid_config_fails_before_source_is_called() {
    let source = Arc::new(CountingSource::new(FixedBatch::new()));
    let sources = Sources::new(Some(source.clone()));
    let config = AnalysisConfig {
        cv_folds: 11,
        ..quick_config()
    };

    let analysis = run(AnalysisKind::CrossValidation, config, &sources);
    assert_eq!(analysis.state(), AnalysisState::Failed);
    assert!(matches!(
        analysis.error(),
        Some(RunError::Analysis(AnalysisError::InvalidConfiguration { field: "cv_folds", .. }))
    ));
    assert!(analysis.report().is_none());
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_detector_batch_fails_under_strict_policy() {
    let sources = Sources::new(Some(Arc::new(FixedBatch::new().as_detector_output())))
        .with_policy(SourcePolicy::strict());
    let analysis = run(AnalysisKind::Background, quick_config(), &sources);
    assert_eq!(analysis.state(), AnalysisState::Failed);
    assert!(matches!(
        analysis.error(),
        Some(RunError::Source(SourceError::Missing { .. }))
    ));
}

#[test]
fn completed_analysis_cannot_rerun() {
    let mut analysis = Analysis::new(AnalysisRequest::new(
        AnalysisKind::CrossValidation,
        quick_config(),
    ));
    analysis.run(&Sources::synthetic()).unwrap();
    let first = analysis.report().cloned();

    let err = analysis.run(&Sources::synthetic()).unwrap_err();
    assert!(matches!(err, RunError::Transition(_)));
    assert_eq!(analysis.state(), AnalysisState::Completed);
    assert_eq!(analysis.report().cloned(), first);
}

#[test]
fn failed_analysis_cannot_rerun() {
    let config = AnalysisConfig {
        confidence_level: 1.5,
        ..quick_config()
    };
    let mut analysis = Analysis::new(AnalysisRequest::new(AnalysisKind::Background, config));
    assert!(analysis.run(&Sources::synthetic()).is_err());
    assert!(matches!(
        analysis.run(&Sources::synthetic()),
        Err(RunError::Transition(_))
    ));
    assert_eq!(analysis.state(), AnalysisState::Failed);
}

#[test]
fn synthetic_runs_are_reproducible() {
    let a = run(AnalysisKind::Background, quick_config(), &Sources::synthetic());
    let b = run(AnalysisKind::Background, quick_config(), &Sources::synthetic());
    assert_eq!(a.report().unwrap().body, b.report().unwrap().body);
    assert_eq!(a.request().id, b.request().id);
}

// ─── Cross-validation ────────────────────────────────────────────────

#[test]
fn identical_folds_are_perfectly_stable() {
    let folds = (1..=5).map(|i| fold(i, 0.85)).collect();
    let sources = Sources::new(Some(Arc::new(FixedBatch::new().with_folds(folds))));
    let analysis = run(AnalysisKind::CrossValidation, quick_config(), &sources);

    let ReportBody::CrossValidation(body) = &analysis.report().unwrap().body else {
        panic!("expected cross-validation body");
    };
    assert_eq!(body.report.stability_index, Some(1.0));
    assert!((body.report.generalization_gap - 0.05).abs() < 1e-12);
    let convergence = body.convergence.as_ref().unwrap();
    assert_eq!(convergence.r_hat, 1.0);
}

#[test]
fn three_folds_skip_convergence() {
    let config = AnalysisConfig {
        cv_folds: 3,
        ..quick_config()
    };
    let analysis = run(AnalysisKind::CrossValidation, config, &Sources::synthetic());
    let ReportBody::CrossValidation(body) = &analysis.report().unwrap().body else {
        panic!("expected cross-validation body");
    };
    assert_eq!(body.report.folds, 3);
    assert!(body.convergence.is_none());
}

// ─── Augmentation ────────────────────────────────────────────────────

#[test]
fn augmentation_reports_improvement() {
    let config = AnalysisConfig {
        augmentation_factor: 6.0,
        ..quick_config()
    };
    let analysis = run(AnalysisKind::Augmentation, config, &Sources::synthetic());
    let ReportBody::Augmentation(body) = &analysis.report().unwrap().body else {
        panic!("expected augmentation body");
    };
    assert_eq!(body.report.runs, 6);
    assert!(body.report.mean_improvement > 0.0);
    assert!(body.report.best_improvement >= body.report.mean_improvement);
    assert!(body.convergence.is_some());
}

#[test]
fn zero_baseline_fails_with_undefined_ratio() {
    let zero = MetricSet {
        accuracy: 0.0,
        precision: 0.5,
        recall: 0.5,
        f1: 0.5,
        auc: 0.5,
    };
    let runs = (1..=2)
        .map(|i| AugmentationRun {
            run_index: i,
            original_sample_count: 100,
            augmented_sample_count: 300,
            augmentation_factor: 3.0,
            before: zero,
            after: MetricSet { accuracy: 0.4, ..zero },
        })
        .collect();
    let sources = Sources::new(Some(Arc::new(FixedBatch::new().with_augmentation_runs(runs))));
    let analysis = run(AnalysisKind::Augmentation, quick_config(), &sources);
    assert_eq!(analysis.state(), AnalysisState::Failed);
    assert!(matches!(
        analysis.error(),
        Some(RunError::Analysis(AnalysisError::UndefinedRatio { .. }))
    ));
}

// ─── Bayesian ────────────────────────────────────────────────────────

#[test]
fn synthetic_posterior_converges() {
    let analysis = run(AnalysisKind::Bayesian, quick_config(), &Sources::synthetic());
    let ReportBody::Bayesian(body) = &analysis.report().unwrap().body else {
        panic!("expected bayesian body");
    };
    assert!(body.converged, "max r_hat = {}", body.max_r_hat);
    assert_eq!(body.parameters.len(), 3);
    for p in &body.parameters {
        assert_eq!(p.draws, 2000);
        assert!(p.effective_sample_size <= 2000.0);
        assert!(p.credible_interval.0 <= p.mean && p.mean <= p.credible_interval.1);
    }
}

// ─── Batches of requests ─────────────────────────────────────────────

#[test]
fn run_all_keeps_request_order() {
    let kinds = [
        AnalysisKind::Bayesian,
        AnalysisKind::Background,
        AnalysisKind::CrossValidation,
        AnalysisKind::Augmentation,
    ];
    let requests = kinds
        .iter()
        .map(|&k| AnalysisRequest::new(k, quick_config()))
        .collect();
    let analyses = run_all(requests, &Sources::synthetic());
    assert_eq!(analyses.len(), 4);
    for (analysis, kind) in analyses.iter().zip(kinds) {
        assert_eq!(analysis.request().kind, kind);
        assert_eq!(analysis.state(), AnalysisState::Completed);
    }
}
