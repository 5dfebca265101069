//! Batch sources and fallback resolution.
//!
//! A [`BatchSource`] hands the orchestrator immutable batches. Three kinds
//! exist:
//! 1. An external detector (any injected `BatchSource`, called under a timeout)
//! 2. A [`FixedBatch`] of pre-supplied data (detector output on disk, tests)
//! 3. The [`SyntheticGenerator`], seeded from the analysis config
//!
//! [`resolve`] applies the fallback policy: if the primary source fails or
//! times out and synthetic data is allowed, the synthetic batch is returned
//! tagged [`Outcome::Degraded`] with the reason. Synthetic data is never
//! passed off as detector output.

use std::fmt;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Exp, Normal, Poisson};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use flarestat_core::rng::{streams, RngHierarchy};
use flarestat_core::{AnalysisConfig, AugmentationRun, Fold, MetricSet, Realization};

use crate::bayesian::ParameterChains;

/// Default wait for the primary source.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest wait a policy may configure.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(90);

/// Errors from obtaining a batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("source '{source_name}' unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    #[error("source '{source_name}' timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        source_name: String,
        timeout: Duration,
    },

    #[error("source '{source_name}' has no {batch} batch")]
    Missing {
        source_name: String,
        batch: &'static str,
    },

    #[error("no primary source configured")]
    NotConfigured,

    #[error("synthetic generation failed: {0}")]
    Generation(String),

    #[error("load batch file {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("invalid source policy: timeout {}s (expected (0, {}]s)", .timeout.as_secs_f64(), MAX_TIMEOUT.as_secs())]
    InvalidPolicy { timeout: Duration },
}

/// Where a batch came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// External detector output.
    Detector,
    /// Pre-supplied fixture.
    #[default]
    Fixed,
    /// Generated by [`SyntheticGenerator`].
    Synthetic,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Detector => "detector",
            Self::Fixed => "fixed",
            Self::Synthetic => "synthetic",
        })
    }
}

/// A value that is either what was asked for, or a fallback with the
/// reason the primary path failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T> {
    Complete(T),
    Degraded { value: T, reason: String },
}

impl<T> Outcome<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Complete(value) | Self::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Complete(value) | Self::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            Self::Complete(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Complete(value) => Outcome::Complete(f(value)),
            Self::Degraded { value, reason } => Outcome::Degraded {
                value: f(value),
                reason,
            },
        }
    }
}

/// Supplier of immutable batches.
pub trait BatchSource: Send + Sync {
    fn name(&self) -> &str;

    fn provenance(&self) -> DataSource;

    fn realizations(&self, config: &AnalysisConfig) -> Result<Vec<Realization>, SourceError>;

    fn folds(&self, config: &AnalysisConfig) -> Result<Vec<Fold>, SourceError>;

    fn augmentation_runs(&self, config: &AnalysisConfig)
        -> Result<Vec<AugmentationRun>, SourceError>;

    fn posterior(&self, config: &AnalysisConfig) -> Result<Vec<ParameterChains>, SourceError>;
}

// ─── Fixed batches ───────────────────────────────────────────────────

/// Pre-supplied batches. Any kind left empty is reported as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedBatch {
    pub realizations: Vec<Realization>,
    pub folds: Vec<Fold>,
    pub augmentation_runs: Vec<AugmentationRun>,
    pub posterior: Vec<ParameterChains>,
    #[serde(skip)]
    provenance: DataSource,
}

impl FixedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_realizations(mut self, realizations: Vec<Realization>) -> Self {
        self.realizations = realizations;
        self
    }

    pub fn with_folds(mut self, folds: Vec<Fold>) -> Self {
        self.folds = folds;
        self
    }

    pub fn with_augmentation_runs(mut self, runs: Vec<AugmentationRun>) -> Self {
        self.augmentation_runs = runs;
        self
    }

    pub fn with_posterior(mut self, posterior: Vec<ParameterChains>) -> Self {
        self.posterior = posterior;
        self
    }

    /// Mark the batch as real detector output.
    pub fn as_detector_output(mut self) -> Self {
        self.provenance = DataSource::Detector;
        self
    }

    pub fn from_json(content: &str) -> Result<Self, SourceError> {
        serde_json::from_str(content).map_err(|e| SourceError::Load {
            path: "<inline>".into(),
            reason: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let load_err = |reason: String| SourceError::Load {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| load_err(e.to_string()))
    }

    fn non_empty<T: Clone>(&self, items: &[T], batch: &'static str) -> Result<Vec<T>, SourceError> {
        if items.is_empty() {
            return Err(SourceError::Missing {
                source_name: self.name().to_string(),
                batch,
            });
        }
        Ok(items.to_vec())
    }
}

impl BatchSource for FixedBatch {
    fn name(&self) -> &str {
        match self.provenance {
            DataSource::Detector => "detector-file",
            _ => "fixed",
        }
    }

    fn provenance(&self) -> DataSource {
        self.provenance
    }

    fn realizations(&self, _config: &AnalysisConfig) -> Result<Vec<Realization>, SourceError> {
        self.non_empty(&self.realizations, "realization")
    }

    fn folds(&self, _config: &AnalysisConfig) -> Result<Vec<Fold>, SourceError> {
        self.non_empty(&self.folds, "fold")
    }

    fn augmentation_runs(
        &self,
        _config: &AnalysisConfig,
    ) -> Result<Vec<AugmentationRun>, SourceError> {
        self.non_empty(&self.augmentation_runs, "augmentation")
    }

    fn posterior(&self, _config: &AnalysisConfig) -> Result<Vec<ParameterChains>, SourceError> {
        self.non_empty(&self.posterior, "posterior")
    }
}

// ─── Synthetic generation ────────────────────────────────────────────

/// Posterior parameters the synthetic sampler draws, with their centers.
const SYNTHETIC_PARAMETERS: [(&str, f64, f64); 3] = [
    ("flare_rate", 0.25, 0.05),
    ("energy_slope", -1.8, 0.15),
    ("background_scale", 0.12, 0.02),
];

/// Lag-one correlation of synthetic posterior chains.
const CHAIN_AUTOCORRELATION: f64 = 0.5;

/// Seeded synthetic batches. Every item is drawn from its own sub-stream of
/// the config seed, so output is identical for any thread count.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticGenerator;

impl SyntheticGenerator {
    pub fn new() -> Self {
        Self
    }
}

fn generation_err(e: impl fmt::Display) -> SourceError {
    SourceError::Generation(e.to_string())
}

impl BatchSource for SyntheticGenerator {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn provenance(&self) -> DataSource {
        DataSource::Synthetic
    }

    fn realizations(&self, config: &AnalysisConfig) -> Result<Vec<Realization>, SourceError> {
        let hierarchy = RngHierarchy::new(config.seed);
        let lambda =
            config.activity_level.detection_rate_per_hour() * f64::from(config.duration_hours);
        let detections = Poisson::new(lambda).map_err(generation_err)?;
        let noise = Normal::new(0.0, 0.05 * config.background_noise_level.max(f64::EPSILON))
            .map_err(generation_err)?;
        let jitter = Normal::new(0.0, 0.05).map_err(generation_err)?;
        let latency = Exp::new(5.0).map_err(generation_err)?;

        debug!(
            realizations = config.realizations,
            lambda, "generating synthetic realizations"
        );

        let batch: Vec<Realization> = (0..config.realizations)
            .into_par_iter()
            .map(|i| {
                let mut rng = hierarchy.rng_for(streams::REALIZATIONS, i as u64);
                let background_level =
                    (0.05 + rng.gen::<f64>() * 0.15 + noise.sample(&mut rng)).max(0.0);
                let count: f64 = detections.sample(&mut rng);
                let confidence =
                    (0.95 - background_level + jitter.sample(&mut rng)).clamp(0.0, 1.0);
                let energy_estimate = 10f64.powf(rng.gen_range(26.0..30.0));
                let false_positive_rate =
                    (background_level * 0.3 + rng.gen::<f64>() * 0.02).clamp(0.0, 1.0);
                let true_positive_rate =
                    (0.85 + rng.gen::<f64>() * 0.1 - background_level * 0.2).clamp(0.0, 1.0);
                let processing_time = 0.01 + latency.sample(&mut rng);
                Realization {
                    id: i + 1,
                    background_level,
                    detection_count: count as u32,
                    confidence,
                    energy_estimate,
                    false_positive_rate,
                    true_positive_rate,
                    processing_time,
                }
            })
            .collect();
        Ok(batch)
    }

    fn folds(&self, config: &AnalysisConfig) -> Result<Vec<Fold>, SourceError> {
        let hierarchy = RngHierarchy::new(config.seed);
        let folds = (1..=config.cv_folds)
            .map(|k| {
                let mut rng = hierarchy.rng_for(streams::FOLDS, k as u64);
                let val_score = 0.8 + rng.gen::<f64>() * 0.15;
                let precision = 0.75 + rng.gen::<f64>() * 0.2;
                let recall = 0.7 + rng.gen::<f64>() * 0.25;
                Fold {
                    fold_index: k,
                    train_score: (val_score + 0.02 + rng.gen::<f64>() * 0.05).min(1.0),
                    val_score,
                    test_score: (val_score - 0.01 + rng.gen::<f64>() * 0.02).clamp(0.0, 1.0),
                    precision,
                    recall,
                    f1: 2.0 * precision * recall / (precision + recall),
                    auc: 0.85 + rng.gen::<f64>() * 0.12,
                }
            })
            .collect();
        Ok(folds)
    }

    fn augmentation_runs(
        &self,
        config: &AnalysisConfig,
    ) -> Result<Vec<AugmentationRun>, SourceError> {
        let hierarchy = RngHierarchy::new(config.seed);
        let spread = Normal::new(0.0, 0.01).map_err(generation_err)?;
        let gain = Normal::new(0.05, 0.02).map_err(generation_err)?;
        let runs = (config.augmentation_factor.round() as usize).max(1);

        let mut out = Vec::with_capacity(runs);
        for i in 0..runs {
            let mut rng = hierarchy.rng_for(streams::AUGMENTATION, i as u64);
            let mut around = |center: f64| (center + spread.sample(&mut rng)).clamp(0.0, 1.0);
            let before = MetricSet {
                accuracy: around(0.82),
                precision: around(0.79),
                recall: around(0.76),
                f1: around(0.77),
                auc: around(0.86),
            };
            let mut lift = |value: f64| (value + gain.sample(&mut rng)).clamp(0.0, 1.0);
            let after = MetricSet {
                accuracy: lift(before.accuracy),
                precision: lift(before.precision),
                recall: lift(before.recall),
                f1: lift(before.f1),
                auc: lift(before.auc),
            };
            let original_sample_count = rng.gen_range(200..1000);
            out.push(AugmentationRun {
                run_index: i + 1,
                original_sample_count,
                augmented_sample_count: (original_sample_count as f64 * config.augmentation_factor)
                    .round() as usize,
                augmentation_factor: config.augmentation_factor,
                before,
                after,
            });
        }
        Ok(out)
    }

    fn posterior(&self, config: &AnalysisConfig) -> Result<Vec<ParameterChains>, SourceError> {
        let hierarchy = RngHierarchy::new(config.seed);
        let draws = config.iterations / config.chains.max(1);
        let innovation = Normal::new(0.0, (1.0 - CHAIN_AUTOCORRELATION.powi(2)).sqrt())
            .map_err(generation_err)?;

        let params = SYNTHETIC_PARAMETERS
            .iter()
            .enumerate()
            .map(|(p, &(name, center, scale))| {
                let chains = (0..config.chains)
                    .map(|c| {
                        let index = (p * config.chains + c) as u64;
                        let mut rng = hierarchy.rng_for(streams::POSTERIOR, index);
                        let mut z: f64 = rng.gen_range(-1.0..1.0);
                        (0..draws)
                            .map(|_| {
                                z = CHAIN_AUTOCORRELATION * z + innovation.sample(&mut rng);
                                center + scale * z
                            })
                            .collect()
                    })
                    .collect();
                ParameterChains::new(name, chains)
            })
            .collect();
        Ok(params)
    }
}

// ─── Resolution ──────────────────────────────────────────────────────

/// How the primary source is called and when fallback is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePolicy {
    pub timeout: Duration,
    /// Fall back to synthetic data (tagged degraded) when the primary fails.
    pub allow_synthetic: bool,
}

impl Default for SourcePolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            allow_synthetic: true,
        }
    }
}

impl SourcePolicy {
    pub fn strict() -> Self {
        Self {
            allow_synthetic: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), SourceError> {
        if self.timeout.is_zero() || self.timeout > MAX_TIMEOUT {
            return Err(SourceError::InvalidPolicy {
                timeout: self.timeout,
            });
        }
        Ok(())
    }
}

/// A resolved batch with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub outcome: Outcome<T>,
    pub source: DataSource,
}

/// Fetch one batch from `primary`, falling back to `fallback` under `policy`.
///
/// `fetch` selects which batch kind to pull from a source. The primary call
/// runs on its own thread; on timeout that thread is abandoned.
pub fn resolve<T, F>(
    primary: Option<Arc<dyn BatchSource>>,
    fallback: &dyn BatchSource,
    policy: &SourcePolicy,
    fetch: F,
) -> Result<Resolved<T>, SourceError>
where
    T: Send + 'static,
    F: Fn(&dyn BatchSource) -> Result<T, SourceError> + Clone + Send + 'static,
{
    policy.validate()?;

    let failure = match primary {
        None => SourceError::NotConfigured,
        Some(source) => {
            let provenance = source.provenance();
            match call_with_timeout(source, fetch.clone(), policy.timeout) {
                Ok(value) => {
                    return Ok(Resolved {
                        outcome: Outcome::Complete(value),
                        source: provenance,
                    })
                }
                Err(e) => {
                    warn!(error = %e, "primary source failed");
                    e
                }
            }
        }
    };

    if !policy.allow_synthetic {
        return Err(failure);
    }

    info!(fallback = fallback.name(), reason = %failure, "using fallback source");
    let value = fetch(fallback)?;
    Ok(Resolved {
        outcome: Outcome::Degraded {
            value,
            reason: failure.to_string(),
        },
        source: fallback.provenance(),
    })
}

fn call_with_timeout<T, F>(
    source: Arc<dyn BatchSource>,
    fetch: F,
    timeout: Duration,
) -> Result<T, SourceError>
where
    T: Send + 'static,
    F: FnOnce(&dyn BatchSource) -> Result<T, SourceError> + Send + 'static,
{
    let source_name = source.name().to_string();
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("flarestat-source-{source_name}"))
        .spawn(move || {
            // The receiver is gone if the caller already timed out.
            let _ = tx.send(fetch(source.as_ref()));
        })
        .map_err(|e| SourceError::Unavailable {
            source_name: source_name.clone(),
            reason: format!("spawn worker: {e}"),
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(SourceError::Timeout {
            source_name,
            timeout,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(SourceError::Unavailable {
            source_name,
            reason: "worker exited without a result".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flarestat_core::ActivityLevel;

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            realizations: 200,
            ..Default::default()
        }
    }

    #[test]
    fn synthetic_realizations_are_deterministic() {
        let gen = SyntheticGenerator::new();
        let a = gen.realizations(&config()).unwrap();
        let b = gen.realizations(&config()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 200);
        assert_eq!(a[0].id, 1);
        assert_eq!(a[199].id, 200);
    }

    #[test]
    fn synthetic_realizations_respect_ranges() {
        let batch = SyntheticGenerator::new().realizations(&config()).unwrap();
        for r in &batch {
            assert!(r.background_level >= 0.0);
            assert!((0.0..=1.0).contains(&r.confidence));
            assert!((1e26..=1e30).contains(&r.energy_estimate));
            assert!((0.0..=1.0).contains(&r.false_positive_rate));
            assert!((0.0..=1.0).contains(&r.true_positive_rate));
            assert!(r.processing_time > 0.0);
        }
    }

    #[test]
    fn seed_changes_batch() {
        let gen = SyntheticGenerator::new();
        let a = gen.realizations(&config()).unwrap();
        let b = gen
            .realizations(&AnalysisConfig { seed: 7, ..config() })
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn activity_level_shifts_detections() {
        let gen = SyntheticGenerator::new();
        let mean_count = |level| {
            let batch = gen
                .realizations(&AnalysisConfig {
                    activity_level: level,
                    realizations: 1000,
                    ..Default::default()
                })
                .unwrap();
            batch.iter().map(|r| f64::from(r.detection_count)).sum::<f64>() / batch.len() as f64
        };
        assert!(mean_count(ActivityLevel::High) > mean_count(ActivityLevel::Low));
    }

    #[test]
    fn synthetic_folds_match_fold_count() {
        let folds = SyntheticGenerator::new()
            .folds(&AnalysisConfig { cv_folds: 7, ..config() })
            .unwrap();
        assert_eq!(folds.len(), 7);
        assert!(folds.iter().enumerate().all(|(i, f)| f.fold_index == i + 1));
        assert!(folds.iter().all(|f| f.train_score >= f.val_score));
    }

    #[test]
    fn synthetic_augmentation_runs_follow_factor() {
        let runs = SyntheticGenerator::new()
            .augmentation_runs(&AnalysisConfig {
                augmentation_factor: 4.0,
                ..config()
            })
            .unwrap();
        assert_eq!(runs.len(), 4);
        for run in &runs {
            assert_eq!(
                run.augmented_sample_count,
                run.original_sample_count * 4
            );
        }
    }

    #[test]
    fn synthetic_posterior_shape() {
        let cfg = AnalysisConfig {
            chains: 4,
            iterations: 2000,
            ..config()
        };
        let params = SyntheticGenerator::new().posterior(&cfg).unwrap();
        assert_eq!(params.len(), SYNTHETIC_PARAMETERS.len());
        for p in &params {
            assert_eq!(p.chains.len(), 4);
            assert!(p.chains.iter().all(|c| c.len() == 500));
        }
    }

    #[test]
    fn fixed_batch_reports_missing_kinds() {
        let batch = FixedBatch::new();
        assert!(matches!(
            batch.folds(&config()),
            Err(SourceError::Missing { batch: "fold", .. })
        ));
    }

    #[test]
    fn fixed_batch_from_json() {
        let json = r#"{"folds": [{"fold_index": 1, "train_score": 0.9, "val_score": 0.85,
            "test_score": 0.84, "precision": 0.8, "recall": 0.78, "f1": 0.79, "auc": 0.9}]}"#;
        let batch = FixedBatch::from_json(json).unwrap();
        assert_eq!(batch.provenance(), DataSource::Fixed);
        assert_eq!(batch.folds(&config()).unwrap().len(), 1);
        assert_eq!(batch.as_detector_output().provenance(), DataSource::Detector);
    }

    #[test]
    fn outcome_accessors() {
        let complete = Outcome::Complete(3);
        assert!(!complete.is_degraded());
        assert_eq!(complete.degraded_reason(), None);
        let degraded = Outcome::Degraded {
            value: 3,
            reason: "timeout".into(),
        };
        assert_eq!(degraded.degraded_reason(), Some("timeout"));
        assert_eq!(degraded.map(|v| v * 2).into_value(), 6);
    }

    #[test]
    fn policy_bounds() {
        assert!(SourcePolicy::default().validate().is_ok());
        let too_long = SourcePolicy {
            timeout: Duration::from_secs(91),
            ..Default::default()
        };
        assert!(too_long.validate().is_err());
        let zero = SourcePolicy {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn resolve_without_primary_degrades() {
        let resolved = resolve(None, &SyntheticGenerator, &SourcePolicy::default(), {
            let cfg = config();
            move |s: &dyn BatchSource| s.folds(&cfg)
        })
        .unwrap();
        assert!(resolved.outcome.is_degraded());
        assert_eq!(resolved.source, DataSource::Synthetic);
    }

    #[test]
    fn strict_resolve_without_primary_fails() {
        let result = resolve(None, &SyntheticGenerator, &SourcePolicy::strict(), {
            let cfg = config();
            move |s: &dyn BatchSource| s.folds(&cfg)
        });
        assert_eq!(result.unwrap_err(), SourceError::NotConfigured);
    }
}
