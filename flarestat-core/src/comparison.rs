//! ComparativeAnalysis: baseline vs treatment comparison, cross-validation
//! stability, augmentation gains, and sample-sufficiency assessment.
//!
//! Ratios with a zero denominator are surfaced explicitly: `compare` fails
//! with [`AnalysisError::UndefinedRatio`] and `stability_index` returns `None`.
//! Neither ever yields ∞ or NaN.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::AggregationConfig;
use crate::convergence::{permutation_test, ConvergenceReport, PermutationTest};
use crate::domain::{AugmentationRun, Fold, FoldMetric, Metric, MetricSet};
use crate::error::{ensure_finite, AnalysisError};
use crate::summary::{mean, population_std, summarize, SummaryReport};

/// ESS/n below this marks a batch as too correlated to trust.
pub const MIN_ESS_RATIO: f64 = 0.1;

// ─── Baseline vs treatment ───────────────────────────────────────────

/// Signed change of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricGain {
    pub metric: Metric,
    pub baseline: f64,
    pub treatment: f64,
    /// `treatment - baseline`.
    pub gain: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub primary_metric: Metric,
    /// One entry per metric, in [`Metric::ALL`] order.
    pub gains: Vec<MetricGain>,
    /// `(treatment_primary - baseline_primary) / baseline_primary`.
    pub improvement_score: f64,
}

impl ComparisonReport {
    pub fn gain(&self, metric: Metric) -> Option<f64> {
        self.gains.iter().find(|g| g.metric == metric).map(|g| g.gain)
    }
}

/// Compare two metric sets on every paired metric.
pub fn compare(
    baseline: &MetricSet,
    treatment: &MetricSet,
    primary: Metric,
) -> Result<ComparisonReport, AnalysisError> {
    let mut gains = Vec::with_capacity(Metric::ALL.len());
    for metric in Metric::ALL {
        let b = ensure_finite("baseline metric", metric.extract(baseline))?;
        let t = ensure_finite("treatment metric", metric.extract(treatment))?;
        gains.push(MetricGain {
            metric,
            baseline: b,
            treatment: t,
            gain: t - b,
        });
    }

    let base = primary.extract(baseline);
    if base == 0.0 {
        return Err(AnalysisError::UndefinedRatio {
            metric: primary.name().to_string(),
        });
    }
    let improvement_score =
        ensure_finite("improvement_score", (primary.extract(treatment) - base) / base)?;

    Ok(ComparisonReport {
        primary_metric: primary,
        gains,
        improvement_score,
    })
}

// ─── Stability ───────────────────────────────────────────────────────

/// `1 - std/mean` over values across folds. `None` when the mean is zero.
pub fn stability_index(values: &[f64]) -> Result<Option<f64>, AnalysisError> {
    let (Some(mean), Some(std)) = (mean(values), population_std(values)) else {
        return Err(AnalysisError::InsufficientData {
            context: "stability index",
            required: 1,
            actual: 0,
        });
    };
    let mean = ensure_finite("mean", mean)?;
    let std = ensure_finite("std", std)?;
    if mean == 0.0 {
        return Ok(None);
    }
    ensure_finite("stability_index", 1.0 - std / mean).map(Some)
}

// ─── Cross-validation ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMetricSummary {
    pub metric: FoldMetric,
    pub summary: SummaryReport,
    pub stability_index: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationReport {
    pub folds: usize,
    /// One entry per fold score, in [`FoldMetric::ALL`] order.
    pub metrics: Vec<FoldMetricSummary>,
    /// Stability of the validation score.
    pub stability_index: Option<f64>,
    /// `mean(train_score) - mean(val_score)`; large values indicate overfitting.
    pub generalization_gap: f64,
}

impl CrossValidationReport {
    pub fn metric(&self, metric: FoldMetric) -> Option<&FoldMetricSummary> {
        self.metrics.iter().find(|m| m.metric == metric)
    }
}

/// Summarize every fold score of a complete cross-validation run.
///
/// Fold indices must be exactly `1..=folds.len()` in any order.
pub fn cross_validation_report(
    folds: &[Fold],
    confidence_level: f64,
) -> Result<CrossValidationReport, AnalysisError> {
    if folds.is_empty() {
        return Err(AnalysisError::InsufficientData {
            context: "cross-validation folds",
            required: 1,
            actual: 0,
        });
    }
    let mut seen = HashSet::with_capacity(folds.len());
    for fold in folds {
        if fold.fold_index == 0 || fold.fold_index > folds.len() || !seen.insert(fold.fold_index) {
            return Err(AnalysisError::invalid(
                "fold_index",
                fold.fold_index,
                "unique 1-based index no larger than the fold count",
            ));
        }
    }

    let mut metrics = Vec::with_capacity(FoldMetric::ALL.len());
    for metric in FoldMetric::ALL {
        let values = metric.column(folds);
        metrics.push(FoldMetricSummary {
            metric,
            summary: summarize(&values, confidence_level)?,
            stability_index: stability_index(&values)?,
        });
    }

    let mean_of = |m: FoldMetric| {
        metrics
            .iter()
            .find(|s| s.metric == m)
            .map(|s| s.summary.mean)
            .unwrap_or_default()
    };
    let generalization_gap = mean_of(FoldMetric::TrainScore) - mean_of(FoldMetric::ValScore);
    let stability_index = metrics
        .iter()
        .find(|s| s.metric == FoldMetric::ValScore)
        .and_then(|s| s.stability_index);

    Ok(CrossValidationReport {
        folds: folds.len(),
        metrics,
        stability_index,
        generalization_gap,
    })
}

// ─── Augmentation ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationReport {
    pub runs: usize,
    pub augmentation_factor: f64,
    /// Mean metric set before augmentation.
    pub baseline: MetricSet,
    /// Mean metric set after augmentation.
    pub treatment: MetricSet,
    pub comparison: ComparisonReport,
    /// Mean per-run gain on the primary metric.
    pub mean_improvement: f64,
    /// Largest per-run gain on the primary metric.
    pub best_improvement: f64,
    /// Population std of the post-augmentation primary metric.
    pub consistency: f64,
    /// Before vs after primary metric.
    pub significance: PermutationTest,
}

/// Aggregate paired before/after runs.
pub fn augmentation_report(
    runs: &[AugmentationRun],
    primary: Metric,
    config: &AggregationConfig,
) -> Result<AugmentationReport, AnalysisError> {
    config.validate()?;
    let before: Vec<MetricSet> = runs.iter().map(|r| r.before).collect();
    let after: Vec<MetricSet> = runs.iter().map(|r| r.after).collect();
    let (Some(baseline), Some(treatment)) = (MetricSet::mean_of(&before), MetricSet::mean_of(&after))
    else {
        return Err(AnalysisError::InsufficientData {
            context: "augmentation runs",
            required: 1,
            actual: 0,
        });
    };

    let comparison = compare(&baseline, &treatment, primary)?;

    let before_primary: Vec<f64> = before.iter().map(|m| primary.extract(m)).collect();
    let after_primary: Vec<f64> = after.iter().map(|m| primary.extract(m)).collect();
    let improvements: Vec<f64> = after_primary
        .iter()
        .zip(&before_primary)
        .map(|(a, b)| a - b)
        .collect();

    let mean_improvement = ensure_finite(
        "mean_improvement",
        mean(&improvements).unwrap_or_default(),
    )?;
    let best_improvement = improvements
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let best_improvement = ensure_finite("best_improvement", best_improvement)?;
    let consistency = ensure_finite(
        "consistency",
        population_std(&after_primary).unwrap_or_default(),
    )?;

    let significance = permutation_test(
        &before_primary,
        &after_primary,
        config.permutation_samples,
        config.seed,
    )?;

    let mean_factor = runs.iter().map(|r| r.augmentation_factor).sum::<f64>() / runs.len() as f64;

    Ok(AugmentationReport {
        runs: runs.len(),
        augmentation_factor: mean_factor,
        baseline,
        treatment,
        comparison,
        mean_improvement,
        best_improvement,
        consistency,
        significance,
    })
}

// ─── Sufficiency ─────────────────────────────────────────────────────

/// Verdict on whether a Monte Carlo batch was large enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SufficiencyAssessment {
    /// Effective sample size / batch size.
    pub ess_ratio: f64,
    /// Parametric CI width relative to |mean|. `None` when the mean is zero.
    pub relative_ci_width: Option<f64>,
    pub converged: bool,
    /// Converged and `ess_ratio >= MIN_ESS_RATIO`.
    pub sufficient: bool,
}

/// Join the two parallel reports of one batch into a single verdict.
pub fn assess_sufficiency(
    summary: &SummaryReport,
    convergence: &ConvergenceReport,
) -> SufficiencyAssessment {
    let ess_ratio = convergence.effective_sample_size / summary.n as f64;
    let relative_ci_width = if summary.mean == 0.0 {
        None
    } else {
        Some(summary.ci_width() / summary.mean.abs())
    };
    SufficiencyAssessment {
        ess_ratio,
        relative_ci_width,
        converged: convergence.converged,
        sufficient: convergence.converged && ess_ratio >= MIN_ESS_RATIO,
    }
}
