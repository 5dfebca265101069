//! Domain types consumed by the aggregator.
//!
//! Batches are produced elsewhere (a detector, a synthetic generator, a test
//! fixture) and handed to the engine read-only. Selector enums pick which
//! numeric column of a batch a statistic is computed over.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─── Monte Carlo realizations ────────────────────────────────────────

/// One simulated (or observed) detection trial in a Monte Carlo batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Realization {
    /// Sequence position in the batch, 1-based.
    pub id: usize,
    pub background_level: f64,
    pub detection_count: u32,
    /// Detector confidence in [0, 1].
    pub confidence: f64,
    /// Estimated flare energy in erg (log-scale distributed).
    pub energy_estimate: f64,
    pub false_positive_rate: f64,
    pub true_positive_rate: f64,
    /// Wall-clock processing time in seconds.
    pub processing_time: f64,
}

/// Which Realization attribute a statistic is computed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealizationField {
    BackgroundLevel,
    DetectionCount,
    #[default]
    Confidence,
    EnergyEstimate,
    FalsePositiveRate,
    TruePositiveRate,
    ProcessingTime,
}

impl RealizationField {
    pub const ALL: [RealizationField; 7] = [
        Self::BackgroundLevel,
        Self::DetectionCount,
        Self::Confidence,
        Self::EnergyEstimate,
        Self::FalsePositiveRate,
        Self::TruePositiveRate,
        Self::ProcessingTime,
    ];

    pub fn extract(&self, r: &Realization) -> f64 {
        match self {
            Self::BackgroundLevel => r.background_level,
            Self::DetectionCount => f64::from(r.detection_count),
            Self::Confidence => r.confidence,
            Self::EnergyEstimate => r.energy_estimate,
            Self::FalsePositiveRate => r.false_positive_rate,
            Self::TruePositiveRate => r.true_positive_rate,
            Self::ProcessingTime => r.processing_time,
        }
    }

    /// Collect this field across a batch, preserving batch order.
    pub fn column(&self, batch: &[Realization]) -> Vec<f64> {
        batch.iter().map(|r| self.extract(r)).collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BackgroundLevel => "background_level",
            Self::DetectionCount => "detection_count",
            Self::Confidence => "confidence",
            Self::EnergyEstimate => "energy_estimate",
            Self::FalsePositiveRate => "false_positive_rate",
            Self::TruePositiveRate => "true_positive_rate",
            Self::ProcessingTime => "processing_time",
        }
    }
}

impl fmt::Display for RealizationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RealizationField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.name() == s)
            .ok_or_else(|| format!("unknown realization field '{s}'"))
    }
}

// ─── Cross-validation ────────────────────────────────────────────────

/// One cross-validation fold. All scores are in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fold {
    /// 1-based, at most the configured fold count.
    pub fold_index: usize,
    pub train_score: f64,
    pub val_score: f64,
    pub test_score: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub auc: f64,
}

/// Which fold score a statistic is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldMetric {
    TrainScore,
    ValScore,
    TestScore,
    Precision,
    Recall,
    F1,
    Auc,
}

impl FoldMetric {
    pub const ALL: [FoldMetric; 7] = [
        Self::TrainScore,
        Self::ValScore,
        Self::TestScore,
        Self::Precision,
        Self::Recall,
        Self::F1,
        Self::Auc,
    ];

    pub fn extract(&self, fold: &Fold) -> f64 {
        match self {
            Self::TrainScore => fold.train_score,
            Self::ValScore => fold.val_score,
            Self::TestScore => fold.test_score,
            Self::Precision => fold.precision,
            Self::Recall => fold.recall,
            Self::F1 => fold.f1,
            Self::Auc => fold.auc,
        }
    }

    pub fn column(&self, folds: &[Fold]) -> Vec<f64> {
        folds.iter().map(|f| self.extract(f)).collect()
    }
}

// ─── Metric sets ─────────────────────────────────────────────────────

/// A model's classification metrics, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub auc: f64,
}

impl MetricSet {
    /// Element-wise mean of several metric sets. `None` for an empty slice.
    pub fn mean_of(sets: &[MetricSet]) -> Option<MetricSet> {
        if sets.is_empty() {
            return None;
        }
        let n = sets.len() as f64;
        let avg = |m: Metric| sets.iter().map(|s| m.extract(s)).sum::<f64>() / n;
        Some(MetricSet {
            accuracy: avg(Metric::Accuracy),
            precision: avg(Metric::Precision),
            recall: avg(Metric::Recall),
            f1: avg(Metric::F1),
            auc: avg(Metric::Auc),
        })
    }
}

/// Which paired metric to read from a [`MetricSet`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Accuracy,
    Precision,
    Recall,
    F1,
    Auc,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Self::Accuracy,
        Self::Precision,
        Self::Recall,
        Self::F1,
        Self::Auc,
    ];

    pub fn extract(&self, set: &MetricSet) -> f64 {
        match self {
            Self::Accuracy => set.accuracy,
            Self::Precision => set.precision,
            Self::Recall => set.recall,
            Self::F1 => set.f1,
            Self::Auc => set.auc,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::F1 => "f1",
            Self::Auc => "auc",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accuracy" => Ok(Self::Accuracy),
            "precision" => Ok(Self::Precision),
            "recall" => Ok(Self::Recall),
            "f1" | "f1_score" => Ok(Self::F1),
            "auc" => Ok(Self::Auc),
            other => Err(format!("unknown metric '{other}'")),
        }
    }
}

// ─── Augmentation ────────────────────────────────────────────────────

/// One before/after data-augmentation trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationRun {
    pub run_index: usize,
    pub original_sample_count: usize,
    /// `original_sample_count * augmentation_factor`, rounded.
    pub augmented_sample_count: usize,
    pub augmentation_factor: f64,
    pub before: MetricSet,
    pub after: MetricSet,
}
