//! Posterior chain analysis.
//!
//! Each model parameter carries one draw sequence per MCMC chain. The
//! analysis reports point estimates and an equal-tailed credible interval
//! over the pooled draws, plus multi-chain R-hat and pooled ESS as the
//! convergence verdict.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use flarestat_core::convergence::{chains_effective_sample_size, r_hat, R_HAT_THRESHOLD};
use flarestat_core::summary::{mean, population_std, quantile_range};
use flarestat_core::AnalysisError;

/// Posterior draws of one named parameter, one `Vec` per chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChains {
    pub name: String,
    pub chains: Vec<Vec<f64>>,
}

impl ParameterChains {
    pub fn new(name: impl Into<String>, chains: Vec<Vec<f64>>) -> Self {
        Self {
            name: name.into(),
            chains,
        }
    }

    /// Total draws across all chains.
    pub fn draws(&self) -> usize {
        self.chains.iter().map(Vec::len).sum()
    }

    fn pooled(&self) -> Vec<f64> {
        self.chains.iter().flatten().copied().collect()
    }
}

/// Posterior summary of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPosterior {
    pub name: String,
    pub draws: usize,
    pub mean: f64,
    pub std: f64,
    /// Equal-tailed interval at the requested level (nearest rank).
    pub credible_interval: (f64, f64),
    pub r_hat: f64,
    /// Summed over chains, never above `draws`.
    pub effective_sample_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorReport {
    pub confidence_level: f64,
    pub parameters: Vec<ParameterPosterior>,
    pub max_r_hat: f64,
    pub min_effective_sample_size: f64,
    /// Every parameter has `r_hat <= 1.1`.
    pub converged: bool,
}

impl PosteriorReport {
    pub fn parameter(&self, name: &str) -> Option<&ParameterPosterior> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Summarize and diagnose every parameter's chains.
pub fn analyze_posterior(
    params: &[ParameterChains],
    confidence_level: f64,
) -> Result<PosteriorReport, AnalysisError> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(AnalysisError::InvalidConfiguration {
            field: "confidence_level",
            value: confidence_level.to_string(),
            expected: "value in the open interval (0, 1)",
        });
    }
    if params.is_empty() {
        return Err(AnalysisError::InsufficientData {
            context: "posterior parameters",
            required: 1,
            actual: 0,
        });
    }

    let parameters = params
        .par_iter()
        .map(|p| analyze_parameter(p, confidence_level))
        .collect::<Result<Vec<_>, _>>()?;

    let max_r_hat = parameters
        .iter()
        .map(|p| p.r_hat)
        .fold(f64::NEG_INFINITY, f64::max);
    let min_effective_sample_size = parameters
        .iter()
        .map(|p| p.effective_sample_size)
        .fold(f64::INFINITY, f64::min);

    Ok(PosteriorReport {
        confidence_level,
        parameters,
        max_r_hat,
        min_effective_sample_size,
        converged: max_r_hat <= R_HAT_THRESHOLD,
    })
}

fn analyze_parameter(
    param: &ParameterChains,
    confidence_level: f64,
) -> Result<ParameterPosterior, AnalysisError> {
    let mut pooled = param.pooled();
    let (Some(mean), Some(std)) = (mean(&pooled), population_std(&pooled)) else {
        return Err(AnalysisError::InsufficientData {
            context: "posterior draws",
            required: 1,
            actual: 0,
        });
    };
    if !mean.is_finite() || !std.is_finite() {
        return Err(AnalysisError::NonFiniteResult {
            statistic: "posterior mean",
            value: mean,
        });
    }

    let r_hat = r_hat(&param.chains)?;
    let effective_sample_size = chains_effective_sample_size(&param.chains)?;

    pooled.sort_by(f64::total_cmp);
    Ok(ParameterPosterior {
        name: param.name.clone(),
        draws: pooled.len(),
        mean,
        std,
        credible_interval: quantile_range(&pooled, confidence_level),
        r_hat,
        effective_sample_size,
    })
}
