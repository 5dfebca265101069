//! flarestat CLI: run one Monte Carlo analysis and emit its report.
//!
//! Commands:
//! - `background`: characterize detector noise over a realization batch
//! - `cross-validation`: fold stability and generalization gap
//! - `augmentation`: before/after gains from data augmentation
//! - `bayesian`: posterior chain convergence and credible intervals
//!
//! Without `--input` the batch is synthetic and the report is tagged
//! degraded. `--strict` turns a missing or failing input into an error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use flarestat_core::{ActivityLevel, AnalysisConfig, Metric, RealizationField};
use flarestat_runner::{
    export_json, save_realizations_csv, save_report, Analysis, AnalysisKind, AnalysisReport,
    AnalysisRequest, BatchSource, FixedBatch, ReportBody, SourcePolicy, Sources,
};

#[derive(Parser)]
#[command(
    name = "flarestat",
    about = "flarestat: Monte Carlo uncertainty and model-validation statistics"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a realization batch and check Monte Carlo convergence.
    Background {
        #[command(flatten)]
        common: CommonArgs,

        /// Monte Carlo batch size for synthetic generation.
        #[arg(long)]
        realizations: Option<usize>,

        /// Observation window in hours.
        #[arg(long)]
        duration_hours: Option<u32>,

        /// Solar activity: low, medium, high.
        #[arg(long)]
        activity_level: Option<ActivityLevel>,

        /// Background noise level in [0, 1].
        #[arg(long)]
        noise: Option<f64>,

        /// Realization attribute to summarize (e.g. confidence, background_level).
        #[arg(long)]
        field: Option<RealizationField>,

        /// Also write the realization batch as CSV.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Summarize cross-validation folds.
    CrossValidation {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of folds for synthetic generation.
        #[arg(long)]
        cv_folds: Option<usize>,
    },
    /// Compare metrics before and after augmentation.
    Augmentation {
        #[command(flatten)]
        common: CommonArgs,

        /// Augmentation factor in [1, 10].
        #[arg(long)]
        augmentation_factor: Option<f64>,
    },
    /// Diagnose posterior chains.
    Bayesian {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of chains.
        #[arg(long)]
        chains: Option<usize>,

        /// Total draws across all chains.
        #[arg(long)]
        iterations: Option<usize>,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Detector output as JSON (realizations, folds, augmentation_runs, posterior).
    #[arg(long)]
    input: Option<PathBuf>,

    /// Fail instead of falling back to synthetic data.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Seconds to wait for the input source.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Master seed for generation and resampling.
    #[arg(long)]
    seed: Option<u64>,

    /// Confidence level in (0, 1).
    #[arg(long)]
    confidence_level: Option<f64>,

    /// Bootstrap resamples.
    #[arg(long)]
    bootstrap_samples: Option<usize>,

    /// Label permutations for the significance test.
    #[arg(long)]
    permutation_samples: Option<usize>,

    /// Primary comparison metric: accuracy, precision, recall, f1, auc.
    #[arg(long)]
    primary_metric: Option<Metric>,

    /// Write the JSON report here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

impl CommonArgs {
    fn load_config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => AnalysisConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(level) = self.confidence_level {
            config.confidence_level = level;
        }
        if let Some(n) = self.bootstrap_samples {
            config.bootstrap_samples = n;
        }
        if let Some(n) = self.permutation_samples {
            config.permutation_samples = n;
        }
        if let Some(metric) = self.primary_metric {
            config.primary_metric = metric;
        }
        Ok(config)
    }

    fn sources(&self) -> Result<Sources> {
        let primary: Option<Arc<dyn BatchSource>> = match &self.input {
            Some(path) => {
                let batch = FixedBatch::from_file(path)?.as_detector_output();
                Some(Arc::new(batch))
            }
            None => None,
        };
        let policy = SourcePolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            allow_synthetic: !self.strict,
        };
        Ok(Sources::new(primary).with_policy(policy))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Background {
            common,
            realizations,
            duration_hours,
            activity_level,
            noise,
            field,
            csv,
        } => {
            let mut config = common.load_config()?;
            if let Some(n) = realizations {
                config.realizations = n;
            }
            if let Some(hours) = duration_hours {
                config.duration_hours = hours;
            }
            if let Some(level) = activity_level {
                config.activity_level = level;
            }
            if let Some(level) = noise {
                config.background_noise_level = level;
            }
            if let Some(field) = field {
                config.field = field;
            }
            let analysis = run_analysis(AnalysisKind::Background, config, &common)?;
            if let Some(path) = csv {
                save_realizations_csv(analysis.realizations(), &path)?;
                info!(path = %path.display(), "realizations saved");
            }
            Ok(())
        }
        Commands::CrossValidation { common, cv_folds } => {
            let mut config = common.load_config()?;
            if let Some(k) = cv_folds {
                config.cv_folds = k;
            }
            run_analysis(AnalysisKind::CrossValidation, config, &common).map(drop)
        }
        Commands::Augmentation {
            common,
            augmentation_factor,
        } => {
            let mut config = common.load_config()?;
            if let Some(factor) = augmentation_factor {
                config.augmentation_factor = factor;
            }
            run_analysis(AnalysisKind::Augmentation, config, &common).map(drop)
        }
        Commands::Bayesian {
            common,
            chains,
            iterations,
        } => {
            let mut config = common.load_config()?;
            if let Some(m) = chains {
                config.chains = m;
            }
            if let Some(n) = iterations {
                config.iterations = n;
            }
            run_analysis(AnalysisKind::Bayesian, config, &common).map(drop)
        }
    }
}

fn run_analysis(kind: AnalysisKind, config: AnalysisConfig, common: &CommonArgs) -> Result<Analysis> {
    let sources = common.sources()?;
    let request = AnalysisRequest::new(kind, config);
    info!(id = %request.id, %kind, "running analysis");

    let mut analysis = Analysis::new(request);
    let report = match analysis.run(&sources) {
        Ok(report) => report.clone(),
        Err(e) => bail!("{kind} analysis failed: {e}"),
    };

    match &common.output {
        Some(path) => {
            save_report(&report, path)?;
            print_summary(&report);
            println!("Report saved to: {}", path.display());
        }
        None => println!("{}", export_json(&report)?),
    }
    Ok(analysis)
}

fn print_summary(report: &AnalysisReport) {
    println!("Analysis {} ({})", report.request_id, report.kind);
    println!("  source: {}", report.source);
    if let Some(reason) = &report.degraded_reason {
        println!("  DEGRADED: {reason}");
    }
    match &report.body {
        ReportBody::Background(body) => {
            let s = &body.aggregate.summary;
            let c = &body.aggregate.convergence;
            println!(
                "  {}: mean {:.4} ± {:.4} (n = {}), CI [{:.4}, {:.4}]",
                body.field, s.mean, s.std, s.n, s.confidence_interval.0, s.confidence_interval.1
            );
            println!(
                "  ESS {:.1}, R-hat {:.3}, converged: {}, sufficient: {}",
                c.effective_sample_size, c.r_hat, c.converged, body.sufficiency.sufficient
            );
            for field in [
                RealizationField::BackgroundLevel,
                RealizationField::DetectionCount,
                RealizationField::EnergyEstimate,
            ] {
                if let Some(f) = body.field_summary(field) {
                    println!(
                        "  {field}: mean {:.4e}, std {:.4e}, p95 {:.4e}",
                        f.mean, f.std, f.percentiles.p95
                    );
                }
            }
        }
        ReportBody::CrossValidation(body) => {
            let stability = body
                .report
                .stability_index
                .map_or_else(|| "undefined".to_string(), |s| format!("{s:.4}"));
            println!(
                "  {} folds, stability {stability}, generalization gap {:.4}",
                body.report.folds, body.report.generalization_gap
            );
        }
        ReportBody::Augmentation(body) => {
            println!(
                "  {} runs, {}: improvement score {:.4}, mean gain {:.4}, p = {:.3}",
                body.report.runs,
                body.report.comparison.primary_metric,
                body.report.comparison.improvement_score,
                body.report.mean_improvement,
                body.report.significance.p_value
            );
        }
        ReportBody::Bayesian(body) => {
            for p in &body.parameters {
                println!(
                    "  {}: {:.4} [{:.4}, {:.4}] R-hat {:.3} ESS {:.0}",
                    p.name, p.mean, p.credible_interval.0, p.credible_interval.1, p.r_hat,
                    p.effective_sample_size
                );
            }
            println!("  converged: {}", body.converged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::try_parse_from([
            "flarestat",
            "background",
            "--realizations",
            "500",
            "--activity-level",
            "high",
            "--field",
            "background_level",
            "--seed",
            "7",
            "--strict",
        ])
        .unwrap();
        let Commands::Background {
            common,
            realizations,
            activity_level,
            field,
            ..
        } = cli.command
        else {
            panic!("expected background command");
        };
        assert_eq!(realizations, Some(500));
        assert_eq!(activity_level, Some(ActivityLevel::High));
        assert_eq!(field, Some(RealizationField::BackgroundLevel));
        assert!(common.strict);
        assert_eq!(common.load_config().unwrap().seed, 7);
    }

    #[test]
    fn cli_rejects_unknown_metric() {
        let parsed = Cli::try_parse_from([
            "flarestat",
            "augmentation",
            "--primary-metric",
            "loss",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_input_file_is_an_error() {
        let cli = Cli::try_parse_from([
            "flarestat",
            "bayesian",
            "--input",
            "/nonexistent/flarestat-input.json",
        ])
        .unwrap();
        let Commands::Bayesian { common, .. } = cli.command else {
            panic!("expected bayesian command");
        };
        assert!(common.sources().is_err());
    }

    #[test]
    fn config_path_is_validated() {
        let common = CommonArgs {
            config: Some(PathBuf::from("/nonexistent/flarestat.toml")),
            input: None,
            strict: false,
            timeout_secs: 30,
            seed: None,
            confidence_level: None,
            bootstrap_samples: None,
            permutation_samples: None,
            primary_metric: None,
            output: None,
        };
        assert!(common.load_config().is_err());
    }
}
