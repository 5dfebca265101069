//! Analysis configuration: recognized request options, their bounds, and
//! TOML loading.
//!
//! Out-of-range values are rejected by [`AnalysisConfig::validate`] before any
//! computation starts. Nothing is silently clamped.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Metric, RealizationField};
use crate::error::AnalysisError;

/// Solar activity regime for synthetic realization generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl ActivityLevel {
    /// Expected flare detections per hour of observation.
    pub fn detection_rate_per_hour(&self) -> f64 {
        match self {
            Self::Low => 0.1,
            Self::Medium => 0.25,
            Self::High => 0.6,
        }
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

impl FromStr for ActivityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown activity level '{other}'")),
        }
    }
}

// ─── Bounds ──────────────────────────────────────────────────────────

pub const REALIZATIONS_RANGE: (usize, usize) = (100, 10_000);
pub const DURATION_HOURS_RANGE: (u32, u32) = (1, 168);
pub const CV_FOLDS_RANGE: (usize, usize) = (3, 10);
pub const AUGMENTATION_FACTOR_RANGE: (f64, f64) = (1.0, 10.0);
pub const RESAMPLES_RANGE: (usize, usize) = (100, 100_000);
pub const CHAINS_RANGE: (usize, usize) = (2, 16);
pub const ITERATIONS_RANGE: (usize, usize) = (100, 100_000);

// ─── Configuration ───────────────────────────────────────────────────

/// Every option an analysis request may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Monte Carlo batch size.
    pub realizations: usize,
    pub duration_hours: u32,
    pub activity_level: ActivityLevel,
    pub cv_folds: usize,
    pub augmentation_factor: f64,
    pub background_noise_level: f64,
    pub confidence_level: f64,
    /// Bootstrap resamples for the convergence CI.
    pub bootstrap_samples: usize,
    /// Label permutations for the two-group significance test.
    pub permutation_samples: usize,
    /// Posterior chains (Bayesian analysis).
    pub chains: usize,
    /// Total posterior draws, split evenly across chains.
    pub iterations: usize,
    pub primary_metric: Metric,
    /// Realization attribute summarized by background analyses.
    pub field: RealizationField,
    /// Master seed for generation and resampling.
    pub seed: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            realizations: 1000,
            duration_hours: 24,
            activity_level: ActivityLevel::Medium,
            cv_folds: 5,
            augmentation_factor: 3.0,
            background_noise_level: 0.1,
            confidence_level: 0.95,
            bootstrap_samples: 1000,
            permutation_samples: 1000,
            chains: 4,
            iterations: 2000,
            primary_metric: Metric::Accuracy,
            field: RealizationField::Confidence,
            seed: 42,
        }
    }
}

impl AnalysisConfig {
    /// Check every bounded option. The first violation is returned.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        check_usize("realizations", self.realizations, REALIZATIONS_RANGE, "integer in [100, 10000]")?;
        if self.duration_hours < DURATION_HOURS_RANGE.0
            || self.duration_hours > DURATION_HOURS_RANGE.1
        {
            return Err(AnalysisError::invalid(
                "duration_hours",
                self.duration_hours,
                "integer in [1, 168]",
            ));
        }
        check_usize("cv_folds", self.cv_folds, CV_FOLDS_RANGE, "integer in [3, 10]")?;
        check_f64(
            "augmentation_factor",
            self.augmentation_factor,
            AUGMENTATION_FACTOR_RANGE,
            "number in [1, 10]",
        )?;
        check_f64(
            "background_noise_level",
            self.background_noise_level,
            (0.0, 1.0),
            "number in [0, 1]",
        )?;
        self.aggregation().validate()?;
        check_usize("chains", self.chains, CHAINS_RANGE, "integer in [2, 16]")?;
        check_usize("iterations", self.iterations, ITERATIONS_RANGE, "integer in [100, 100000]")?;
        if self.iterations / self.chains < 4 {
            return Err(AnalysisError::invalid(
                "iterations",
                self.iterations,
                "at least 4 draws per chain",
            ));
        }
        Ok(())
    }

    /// The subset of options the pure aggregation functions consume.
    pub fn aggregation(&self) -> AggregationConfig {
        AggregationConfig {
            confidence_level: self.confidence_level,
            bootstrap_samples: self.bootstrap_samples,
            permutation_samples: self.permutation_samples,
            field: self.field,
            seed: self.seed,
        }
    }

    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string. Missing keys take
    /// their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Options for [`crate::aggregate::aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub confidence_level: f64,
    pub bootstrap_samples: usize,
    pub permutation_samples: usize,
    pub field: RealizationField,
    /// Seed for resampling; identical seeds give bit-identical reports.
    pub seed: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AnalysisConfig::default().aggregation()
    }
}

impl AggregationConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(AnalysisError::invalid(
                "confidence_level",
                self.confidence_level,
                "value in the open interval (0, 1)",
            ));
        }
        check_usize(
            "bootstrap_samples",
            self.bootstrap_samples,
            RESAMPLES_RANGE,
            "integer in [100, 100000]",
        )?;
        check_usize(
            "permutation_samples",
            self.permutation_samples,
            RESAMPLES_RANGE,
            "integer in [100, 100000]",
        )?;
        Ok(())
    }
}

fn check_usize(
    field: &'static str,
    value: usize,
    (lo, hi): (usize, usize),
    expected: &'static str,
) -> Result<(), AnalysisError> {
    if value < lo || value > hi {
        return Err(AnalysisError::invalid(field, value, expected));
    }
    Ok(())
}

fn check_f64(
    field: &'static str,
    value: f64,
    (lo, hi): (f64, f64),
    expected: &'static str,
) -> Result<(), AnalysisError> {
    // NaN fails the contains check.
    if !(lo..=hi).contains(&value) {
        return Err(AnalysisError::invalid(field, value, expected));
    }
    Ok(())
}

/// Errors from loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] AnalysisError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_realizations() {
        for n in [0, 99, 10_001] {
            let config = AnalysisConfig { realizations: n, ..Default::default() };
            assert!(matches!(
                config.validate(),
                Err(AnalysisError::InvalidConfiguration { field: "realizations", .. })
            ));
        }
    }

    #[test]
    fn accepts_range_endpoints() {
        let lo = AnalysisConfig {
            realizations: 100,
            duration_hours: 1,
            cv_folds: 3,
            augmentation_factor: 1.0,
            background_noise_level: 0.0,
            ..Default::default()
        };
        let hi = AnalysisConfig {
            realizations: 10_000,
            duration_hours: 168,
            cv_folds: 10,
            augmentation_factor: 10.0,
            background_noise_level: 1.0,
            ..Default::default()
        };
        assert!(lo.validate().is_ok());
        assert!(hi.validate().is_ok());
    }

    #[test]
    fn rejects_each_bounded_option() {
        let cases: Vec<(&str, AnalysisConfig)> = vec![
            ("duration_hours", AnalysisConfig { duration_hours: 169, ..Default::default() }),
            ("cv_folds", AnalysisConfig { cv_folds: 2, ..Default::default() }),
            ("augmentation_factor", AnalysisConfig { augmentation_factor: 0.5, ..Default::default() }),
            ("augmentation_factor", AnalysisConfig { augmentation_factor: f64::NAN, ..Default::default() }),
            ("background_noise_level", AnalysisConfig { background_noise_level: 1.5, ..Default::default() }),
            ("confidence_level", AnalysisConfig { confidence_level: 1.0, ..Default::default() }),
            ("confidence_level", AnalysisConfig { confidence_level: 0.0, ..Default::default() }),
            ("bootstrap_samples", AnalysisConfig { bootstrap_samples: 10, ..Default::default() }),
            ("permutation_samples", AnalysisConfig { permutation_samples: 200_000, ..Default::default() }),
            ("chains", AnalysisConfig { chains: 1, ..Default::default() }),
            ("iterations", AnalysisConfig { iterations: 50, ..Default::default() }),
        ];
        for (expected_field, config) in cases {
            match config.validate() {
                Err(AnalysisError::InvalidConfiguration { field, .. }) => {
                    assert_eq!(field, expected_field)
                }
                other => panic!("expected {expected_field} rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn from_toml_fills_defaults() {
        let config = AnalysisConfig::from_toml(
            r#"
            realizations = 500
            activity_level = "high"
            primary_metric = "f1"
            field = "background_level"
            "#,
        )
        .unwrap();
        assert_eq!(config.realizations, 500);
        assert_eq!(config.activity_level, ActivityLevel::High);
        assert_eq!(config.primary_metric, Metric::F1);
        assert_eq!(config.field, RealizationField::BackgroundLevel);
        assert_eq!(config.cv_folds, 5);
        assert_eq!(config.confidence_level, 0.95);
    }

    #[test]
    fn from_toml_validates() {
        let err = AnalysisConfig::from_toml("cv_folds = 11").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {err:?}");
    }

    #[test]
    fn from_toml_reports_parse_errors() {
        let err = AnalysisConfig::from_toml("activity_level = \"extreme\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn activity_level_parses() {
        assert_eq!("LOW".parse::<ActivityLevel>(), Ok(ActivityLevel::Low));
        assert!("x".parse::<ActivityLevel>().is_err());
        assert!(
            ActivityLevel::High.detection_rate_per_hour()
                > ActivityLevel::Low.detection_rate_per_hour()
        );
    }
}
