//! ConvergenceDiagnostics: was the Monte Carlo batch large enough?
//!
//! - Effective sample size: `n / τ` with the integrated autocorrelation time
//!   `τ = -1 + 2·Σ Γ_m`, `Γ_m = ρ_{2m} + ρ_{2m+1}` summed while positive
//!   (Geyer's initial positive sequence). Clamped to `[1, n]`.
//! - R-hat: Gelman-Rubin potential scale reduction over split chains.
//! - Bootstrap CI: nearest-rank [2.5th, 97.5th] percentiles of the resampled
//!   statistic.
//! - Permutation test: fraction of label permutations whose absolute mean
//!   difference is at least the observed one.
//!
//! Resampling is driven by [`RngHierarchy`] sub-seeds, one per resample
//! index, so rayon fan-out never changes the result.

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::AggregationConfig;
use crate::error::{ensure_finite, AnalysisError};
use crate::rng::{streams, RngHierarchy};
use crate::summary::{quantile_range, sorted_copy};

/// Smallest batch any diagnostic accepts.
pub const MIN_SAMPLE: usize = 2;
/// Smallest batch split R-hat accepts (two halves of at least two draws).
pub const MIN_SPLIT_SAMPLE: usize = 4;
/// R-hat above this indicates non-convergence.
pub const R_HAT_THRESHOLD: f64 = 1.1;
/// Coverage of the bootstrap percentile interval.
pub const BOOTSTRAP_CI_LEVEL: f64 = 0.95;

// ─── Result types ────────────────────────────────────────────────────

/// Convergence indicators for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub effective_sample_size: f64,
    pub r_hat: f64,
    /// Bootstrap percentile interval of the batch mean.
    pub bootstrap_ci: (f64, f64),
    pub bootstrap_samples: usize,
    /// First half vs second half of the batch (drift check).
    pub permutation_p_value: f64,
    pub converged: bool,
}

/// Outcome of a two-group permutation test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermutationTest {
    /// `|mean(a) - mean(b)|` on the original labels.
    pub observed: f64,
    pub p_value: f64,
    pub permutations: usize,
}

// ─── Batch diagnostics ───────────────────────────────────────────────

/// Run every diagnostic on one batch.
pub fn diagnose(xs: &[f64], config: &AggregationConfig) -> Result<ConvergenceReport, AnalysisError> {
    config.validate()?;
    require_sample("convergence diagnostics", xs, MIN_SAMPLE)?;

    let effective_sample_size = effective_sample_size(xs)?;
    let r_hat = split_r_hat(xs)?;
    let bootstrap_ci = bootstrap_ci(xs, mean_of, config.bootstrap_samples, config.seed)?;

    let half = xs.len() / 2;
    let drift = permutation_test(
        &xs[..half],
        &xs[xs.len() - half..],
        config.permutation_samples,
        config.seed,
    )?;

    Ok(ConvergenceReport {
        effective_sample_size,
        r_hat,
        bootstrap_ci,
        bootstrap_samples: config.bootstrap_samples,
        permutation_p_value: drift.p_value,
        converged: r_hat <= R_HAT_THRESHOLD,
    })
}

// ─── Effective sample size ───────────────────────────────────────────

/// Effective sample size of a single (possibly autocorrelated) series.
///
/// A zero-variance series carries no autocorrelation information and
/// reports `n`.
pub fn effective_sample_size(xs: &[f64]) -> Result<f64, AnalysisError> {
    require_sample("effective sample size", xs, MIN_SAMPLE)?;
    let n = xs.len();
    let mean = ensure_finite("mean", mean_of(xs))?;
    let centered: Vec<f64> = xs.iter().map(|&x| x - mean).collect();

    let gamma0 = ensure_finite(
        "autocovariance",
        centered.iter().map(|c| c * c).sum::<f64>() / n as f64,
    )?;
    if gamma0 == 0.0 {
        return Ok(n as f64);
    }

    let rho = |lag: usize| -> f64 {
        let cov = centered[..n - lag]
            .iter()
            .zip(&centered[lag..])
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / n as f64;
        cov / gamma0
    };

    let mut tau = -1.0;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        tau += 2.0 * pair;
        lag += 2;
    }

    let n_f = n as f64;
    let ess = if tau <= 0.0 { n_f } else { (n_f / tau).clamp(1.0, n_f) };
    ensure_finite("effective_sample_size", ess)
}

/// Effective sample size pooled over several chains, capped at the total
/// number of draws.
pub fn chains_effective_sample_size(chains: &[Vec<f64>]) -> Result<f64, AnalysisError> {
    if chains.is_empty() {
        return Err(AnalysisError::InsufficientSample {
            context: "chain effective sample size",
            required: 1,
            actual: 0,
        });
    }
    let mut total = 0.0;
    let mut draws = 0usize;
    for chain in chains {
        total += effective_sample_size(chain)?;
        draws += chain.len();
    }
    Ok(total.min(draws as f64))
}

// ─── R-hat ───────────────────────────────────────────────────────────

/// Split R-hat of a single batch: first half vs second half. The middle
/// draw of an odd-length batch is dropped.
pub fn split_r_hat(xs: &[f64]) -> Result<f64, AnalysisError> {
    require_sample("split R-hat", xs, MIN_SPLIT_SAMPLE)?;
    let half = xs.len() / 2;
    gelman_rubin(&[&xs[..half], &xs[xs.len() - half..]])
}

/// Split R-hat over several chains. Each chain is halved and all halves are
/// truncated to the shortest one.
pub fn r_hat(chains: &[Vec<f64>]) -> Result<f64, AnalysisError> {
    let shortest = chains.iter().map(Vec::len).min().unwrap_or(0);
    if chains.is_empty() || shortest < MIN_SPLIT_SAMPLE {
        return Err(AnalysisError::InsufficientSample {
            context: "multi-chain R-hat",
            required: MIN_SPLIT_SAMPLE,
            actual: shortest,
        });
    }
    let half = shortest / 2;
    let halves: Vec<&[f64]> = chains
        .iter()
        .flat_map(|c| [&c[..half], &c[c.len() - half..]])
        .collect();
    gelman_rubin(&halves)
}

/// Potential scale reduction `sqrt(V̂ / W)` over equal-length chains.
fn gelman_rubin(chains: &[&[f64]]) -> Result<f64, AnalysisError> {
    let m = chains.len() as f64;
    let len = chains[0].len() as f64;

    let means: Vec<f64> = chains.iter().map(|c| mean_of(c)).collect();
    let within: Vec<f64> = chains
        .iter()
        .zip(&means)
        .map(|(c, &mu)| c.iter().map(|&x| (x - mu).powi(2)).sum::<f64>() / (len - 1.0))
        .collect();

    let w = ensure_finite("within-chain variance", within.iter().sum::<f64>() / m)?;
    let grand = means.iter().sum::<f64>() / m;
    let b = ensure_finite(
        "between-chain variance",
        len * means.iter().map(|&mu| (mu - grand).powi(2)).sum::<f64>() / (m - 1.0),
    )?;

    if w == 0.0 {
        if b == 0.0 {
            return Ok(1.0);
        }
        return Err(AnalysisError::NonFiniteResult {
            statistic: "r_hat",
            value: f64::INFINITY,
        });
    }

    let var_plus = (len - 1.0) / len * w + b / len;
    ensure_finite("r_hat", (var_plus / w).sqrt())
}

// ─── Resampling ──────────────────────────────────────────────────────

/// Bootstrap percentile interval of `statistic` over `resamples` draws with
/// replacement.
pub fn bootstrap_ci<F>(
    xs: &[f64],
    statistic: F,
    resamples: usize,
    seed: u64,
) -> Result<(f64, f64), AnalysisError>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    require_sample("bootstrap", xs, MIN_SAMPLE)?;
    if resamples == 0 {
        return Err(AnalysisError::invalid("bootstrap_samples", 0, "at least 1 resample"));
    }

    let n = xs.len();
    let hierarchy = RngHierarchy::new(seed);
    let stats: Vec<f64> = (0..resamples)
        .into_par_iter()
        .map(|b| {
            let mut rng = hierarchy.rng_for(streams::BOOTSTRAP, b as u64);
            let resample: Vec<f64> = (0..n).map(|_| xs[rng.gen_range(0..n)]).collect();
            statistic(&resample)
        })
        .collect();

    if let Some(&bad) = stats.iter().find(|s| !s.is_finite()) {
        return Err(AnalysisError::NonFiniteResult {
            statistic: "bootstrap statistic",
            value: bad,
        });
    }

    let sorted = sorted_copy(&stats);
    Ok(quantile_range(&sorted, BOOTSTRAP_CI_LEVEL))
}

/// Two-group permutation test on the absolute difference of means.
pub fn permutation_test(
    a: &[f64],
    b: &[f64],
    permutations: usize,
    seed: u64,
) -> Result<PermutationTest, AnalysisError> {
    if a.is_empty() || b.is_empty() {
        return Err(AnalysisError::InsufficientData {
            context: "permutation test group",
            required: 1,
            actual: a.len().min(b.len()),
        });
    }
    if permutations == 0 {
        return Err(AnalysisError::invalid("permutation_samples", 0, "at least 1 permutation"));
    }

    let observed = ensure_finite("permutation statistic", (mean_of(a) - mean_of(b)).abs())?;
    let tolerance = 1e-12 * observed.max(1.0);

    let pooled: Vec<f64> = a.iter().chain(b).copied().collect();
    let hierarchy = RngHierarchy::new(seed);
    let extreme = (0..permutations)
        .into_par_iter()
        .filter(|&i| {
            let mut rng = hierarchy.rng_for(streams::PERMUTATION, i as u64);
            let mut shuffled = pooled.clone();
            shuffled.shuffle(&mut rng);
            let (pa, pb) = shuffled.split_at(a.len());
            (mean_of(pa) - mean_of(pb)).abs() >= observed - tolerance
        })
        .count();

    Ok(PermutationTest {
        observed,
        p_value: extreme as f64 / permutations as f64,
        permutations,
    })
}

fn require_sample(context: &'static str, xs: &[f64], required: usize) -> Result<(), AnalysisError> {
    if xs.len() < required {
        return Err(AnalysisError::InsufficientSample {
            context,
            required,
            actual: xs.len(),
        });
    }
    Ok(())
}

fn mean_of(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}
