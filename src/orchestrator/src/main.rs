//! Personalization Orchestrator CLI — runs customer segmentation and
//! experiment evaluation over JSON input files.
//!
//! Results are written to stdout as JSON; logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use orchestrator_core::config::AppConfig;
use orchestrator_experiments::{
    ExperimentEngine, ExperimentRegistry, ExperimentRequest, ExperimentStatus,
};
use orchestrator_segmentation::{CustomerFeatures, SegmentationEngine};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "personalization-orchestrator")]
#[command(about = "Customer segmentation and experiment analysis")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables with ORCHESTRATOR__ still apply)
    #[arg(long, env = "ORCHESTRATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster customers into segments
    Segment {
        /// JSON file holding an array of customer feature records
        #[arg(short, long)]
        input: PathBuf,

        /// Number of segments (overrides config)
        #[arg(short = 'k', long)]
        segments: Option<usize>,

        /// Clustering algorithm (overrides config)
        #[arg(short, long)]
        algorithm: Option<String>,
    },

    /// Create an experiment, replay its observed counters and evaluate it
    Experiment {
        /// JSON scenario file: experiment request, observations, optional final status
        #[arg(short, long)]
        input: PathBuf,

        /// Minimum confidence to call a winner significant (overrides config)
        #[arg(long)]
        significance_threshold: Option<f64>,
    },
}

#[derive(Debug, Deserialize)]
struct ExperimentScenario {
    experiment: ExperimentRequest,
    #[serde(default)]
    observations: Vec<Observation>,
    status: Option<ExperimentStatus>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    variant_id: String,
    impressions: u64,
    clicks: u64,
    conversions: u64,
    #[serde(default)]
    revenue: f64,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "personalization_orchestrator=info,orchestrator_segmentation=info,orchestrator_experiments=info"
            .into()
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(Some(path))
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(AppConfig::load(None).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        })),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn run_segment(
    config: &AppConfig,
    input: &Path,
    segments: Option<usize>,
    algorithm: Option<String>,
) -> Result<serde_json::Value> {
    let customers: Vec<CustomerFeatures> = read_json(input)?;
    let engine = SegmentationEngine::new(config.segmentation.clone());

    let num_segments = segments.unwrap_or(config.segmentation.default_num_segments);
    let algorithm = algorithm.unwrap_or_else(|| config.segmentation.default_algorithm.clone());

    let result = engine
        .segment(&customers, num_segments, &algorithm)
        .context("segmentation failed")?;
    Ok(serde_json::to_value(result)?)
}

fn run_experiment(config: &AppConfig, input: &Path) -> Result<serde_json::Value> {
    let scenario: ExperimentScenario = read_json(input)?;
    let engine = ExperimentEngine::new(
        config.experiments.clone(),
        Arc::new(ExperimentRegistry::new()),
    );

    let experiment = engine
        .create_from_request(scenario.experiment)
        .context("experiment creation failed")?;
    let id = experiment.experiment_id.as_str();

    for obs in &scenario.observations {
        engine
            .record_metrics(
                id,
                &obs.variant_id,
                obs.impressions,
                obs.clicks,
                obs.conversions,
                obs.revenue,
            )
            .with_context(|| format!("rejected observation for variant '{}'", obs.variant_id))?;
    }

    if let Some(status) = scenario.status {
        engine
            .set_status(id, status)
            .context("status transition failed")?;
    }

    let result = engine.evaluate(id).context("evaluation failed")?;
    Ok(serde_json::json!({
        "experiment": engine.get(id)?,
        "result": result,
    }))
}

fn check_significance_threshold(threshold: f64) -> Result<()> {
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        bail!("significance threshold must be within [0, 1], got {}", threshold);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Personalization Orchestrator starting");

    let mut config = load_config(cli.config.as_deref())?;

    let output = match cli.command {
        Commands::Segment {
            input,
            segments,
            algorithm,
        } => run_segment(&config, &input, segments, algorithm)?,
        Commands::Experiment {
            input,
            significance_threshold,
        } => {
            if let Some(threshold) = significance_threshold {
                config.experiments.significance_threshold = threshold;
            }
            check_significance_threshold(config.experiments.significance_threshold)?;
            run_experiment(&config, &input)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
