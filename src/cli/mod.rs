//! Command-line interface for driftline.
//!
//! Provides commands for running the training and inference pipelines,
//! listing runs, and printing the drift report of an inference run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

use crate::config;
use crate::core::{Parameters, PipelineError, PipelineRegistry};
use crate::domain::{short_fingerprint, Run, RunStatus};
use crate::drift::DriftReport;
use crate::lifecycle::{register_lifecycle, DEFAULT_TARGET, INFERENCE_PIPELINE, TRAINING_PIPELINE};
use crate::steps::{Deployment, LocalModelServer, Metrics, ModelServer};

/// driftline - ML lifecycle pipelines with cached steps and drift detection
#[derive(Parser, Debug)]
#[command(name = "driftline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train, evaluate and conditionally deploy a model
    Train {
        /// Training dataset (columnar JSON)
        #[arg(short, long)]
        data: PathBuf,

        /// Target column
        #[arg(short, long, default_value = DEFAULT_TARGET)]
        target: String,

        /// Share of rows held out for evaluation
        #[arg(long, default_value = "0.2")]
        test_fraction: f64,

        /// Minimum R² for deployment (defaults to the configured value)
        #[arg(long)]
        min_r2: Option<f64>,

        /// Service to deploy to (defaults to the configured value)
        #[arg(short, long)]
        service: Option<String>,
    },

    /// Predict on new data and check it for drift
    Infer {
        /// Reference (training) dataset
        #[arg(short, long)]
        reference: PathBuf,

        /// New dataset to predict on
        #[arg(short, long)]
        data: PathBuf,

        /// Target column, excluded from drift features
        #[arg(short, long, default_value = DEFAULT_TARGET)]
        target: String,

        /// Service to predict with (defaults to the configured value)
        #[arg(short, long)]
        service: Option<String>,
    },

    /// List runs of a pipeline, oldest first
    Runs {
        /// Pipeline name
        #[arg(default_value = INFERENCE_PIPELINE)]
        pipeline: String,

        /// Maximum number of runs to show (most recent)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Print the drift report of an inference run as JSON
    Report {
        /// Run ID (defaults to the latest inference run)
        #[arg(short, long)]
        run: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Train {
                data,
                target,
                test_fraction,
                min_r2,
                service,
            } => train(&data, &target, test_fraction, min_r2, service).await,
            Commands::Infer {
                reference,
                data,
                target,
                service,
            } => infer(&reference, &data, &target, service).await,
            Commands::Runs { pipeline, limit } => list_runs(&pipeline, limit).await,
            Commands::Report { run } => show_report(run.as_deref()).await,
            Commands::Config => show_config(),
        }
    }
}

/// Registry with both lifecycle pipelines, in the configured home
fn open_registry() -> Result<PipelineRegistry> {
    let mut registry = PipelineRegistry::open_default().context("Failed to open driftline home")?;
    let server: Arc<dyn ModelServer> = Arc::new(LocalModelServer::open_default()?);
    register_lifecycle(&mut registry, server)?;
    Ok(registry)
}

fn dataset_path(path: &Path) -> Result<String> {
    let absolute = path
        .canonicalize()
        .with_context(|| format!("Dataset not found: {}", path.display()))?;
    Ok(absolute.display().to_string())
}

/// Print the outcome of a failed run and exit
fn report_failure(error: PipelineError) -> Result<Run> {
    if error.is_step_failure() {
        eprintln!("\n[{}]", error);
        std::process::exit(1);
    }
    Err(error.into())
}

/// Run the training pipeline
async fn train(
    data: &Path,
    target: &str,
    test_fraction: f64,
    min_r2: Option<f64>,
    service: Option<String>,
) -> Result<()> {
    let cfg = config::config()?;
    let registry = open_registry()?;
    let data = dataset_path(data)?;

    let parameters: Parameters = [
        ("data", json!(data)),
        ("target", json!(target)),
        ("test_fraction", json!(test_fraction)),
        ("min_r2", json!(min_r2.unwrap_or(cfg.deployment.min_r2))),
        (
            "service",
            json!(service.unwrap_or_else(|| cfg.deployment.service.clone())),
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let run = match registry.run(TRAINING_PIPELINE, &parameters).await {
        Ok(run) => run,
        Err(e) => report_failure(e)?,
    };
    print_steps(&run);

    let metrics: Metrics = registry.step_output(&run, "evaluate_model", "metrics").await?;
    println!("\nR²: {:.4}  RMSE: {:.4}  ({} test rows)", metrics.r2, metrics.rmse, metrics.rows);

    let deployment: Deployment = registry.step_output(&run, "deploy_model", "deployment").await?;
    match deployment {
        Deployment::Deployed { service } => println!(
            "Deployed to service '{}' (model {})",
            service.name,
            short_fingerprint(&service.model_hash)
        ),
        Deployment::NotDeployed { reason } => println!("Not deployed: {}", reason),
    }

    eprintln!("\n[Run {} completed successfully]", run.id);
    Ok(())
}

/// Run the inference pipeline
async fn infer(reference: &Path, data: &Path, target: &str, service: Option<String>) -> Result<()> {
    let cfg = config::config()?;
    let registry = open_registry()?;
    let data = dataset_path(data)?;
    let reference = dataset_path(reference)?;

    let parameters: Parameters = [
        ("data", json!(data)),
        ("reference", json!(reference)),
        ("target", json!(target)),
        (
            "service",
            json!(service.unwrap_or_else(|| cfg.deployment.service.clone())),
        ),
        ("policy", serde_json::to_value(&cfg.drift)?),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let run = match registry.run(INFERENCE_PIPELINE, &parameters).await {
        Ok(run) => run,
        Err(e) => report_failure(e)?,
    };
    print_steps(&run);

    let predictions: Vec<f64> = registry.step_output(&run, "predictor", "predictions").await?;
    let report: DriftReport = registry.step_output(&run, "drift_detector", "report").await?;

    println!("\nPredictions: {}", predictions.len());
    println!();
    println!(
        "{:<24} {:<20} {:>10} {:>10} {:<8}",
        "FEATURE", "METHOD", "STATISTIC", "THRESHOLD", "DRIFTED"
    );
    println!("{}", "-".repeat(76));
    for feature in &report.features {
        let method = serde_json::to_value(feature.method)?;
        println!(
            "{:<24} {:<20} {:>10.4} {:>10.4} {:<8}",
            feature.feature,
            method.as_str().unwrap_or_default(),
            feature.statistic,
            feature.threshold,
            if feature.drifted { "yes" } else { "no" }
        );
    }
    for skipped in &report.skipped {
        println!("{:<24} skipped: {}", skipped.feature, skipped.reason);
    }
    println!(
        "\nDataset drifted: {} ({} of {} features)",
        report.dataset_drifted,
        report.drifted_count,
        report.features.len()
    );

    eprintln!("\n[Run {} completed successfully]", run.id);
    Ok(())
}

fn print_steps(run: &Run) {
    println!("{:<28} {:<16} {:<14} {:>10}", "STEP", "STATUS", "FINGERPRINT", "MS");
    println!("{}", "-".repeat(71));
    for step in &run.steps {
        println!(
            "{:<28} {:<16} {:<14} {:>10}",
            step.step,
            step.status.as_str(),
            step.fingerprint.as_deref().map(short_fingerprint).unwrap_or("-"),
            step.duration_ms().map(|ms| ms.to_string()).unwrap_or_default()
        );
    }
}

/// List runs of a pipeline
async fn list_runs(pipeline: &str, limit: usize) -> Result<()> {
    let registry = open_registry()?;
    let runs = registry.get_runs(pipeline).await?;

    if runs.is_empty() {
        println!("No runs found for pipeline '{}'", pipeline);
        return Ok(());
    }

    println!("{:<38} {:<10} {:<20} {:>7}", "RUN ID", "STATUS", "STARTED", "CACHED");
    println!("{}", "-".repeat(78));

    let skip = runs.len().saturating_sub(limit);
    for run in runs.iter().skip(skip) {
        let status = match run.status {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        let cached = run
            .steps
            .iter()
            .filter(|s| s.status == crate::domain::ExecutionStatus::SkippedCached)
            .count();
        println!(
            "{:<38} {:<10} {:<20} {:>3}/{:<3}",
            run.id,
            status,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            cached,
            run.steps.len()
        );
        if let Some(error) = &run.error {
            println!("    {}", error);
        }
    }

    Ok(())
}

/// Print the drift report of an inference run
async fn show_report(run_id: Option<&str>) -> Result<()> {
    let registry = open_registry()?;

    let run = match run_id {
        Some(id) => {
            let id = Uuid::parse_str(id).with_context(|| format!("Invalid run ID: {}", id))?;
            registry.get_run(INFERENCE_PIPELINE, id).await?
        }
        None => registry.latest_run(INFERENCE_PIPELINE).await?,
    };

    let report: DriftReport = registry
        .step_output(&run, "drift_detector", "report")
        .await
        .with_context(|| format!("Run {} has no drift report", run.id))?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("driftline configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Artifacts: {}", cfg.artifacts_dir().display());
    println!("  Runs:      {}", cfg.runs_dir().display());
    println!("  Services:  {}", cfg.services_dir().display());
    println!();
    println!("Drift:");
    println!("  Threshold:   {}", cfg.drift.default_threshold);
    for (feature, threshold) in &cfg.drift.per_feature {
        println!("  {:<12} {}", format!("{}:", feature), threshold);
    }
    println!("  Aggregation: {}", serde_json::to_string(&cfg.drift.aggregation)?);
    println!();
    println!("Deployment:");
    println!("  Min R²:  {}", cfg.deployment.min_r2);
    println!("  Service: {}", cfg.deployment.service);

    Ok(())
}
