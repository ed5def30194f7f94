//! Tuner Worker - serverless entry point for fine-tuning jobs.
//!
//! With `--test-input` the worker runs one job from a local JSON file and
//! prints its response. Otherwise it polls the job queue configured under
//! `worker.*` until interrupted.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tuner_core::{FineTuneHandler, LogFormat, Worker, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "tuner-worker", author, version, about = "Fine-tuning job worker")]
struct Args {
    /// Config file (defaults to ./tuner.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single job from a JSON file instead of polling
    #[arg(long)]
    test_input: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn init_tracing(config: &WorkerConfig, level_override: Option<&str>) {
    let default_level = level_override.unwrap_or(&config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer().with_target(false)).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = WorkerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config, args.log_level.as_deref());

    config
        .prepare_base_volume()
        .with_context(|| format!("Failed to prepare base volume {}", config.base_volume.display()))?;
    info!(base_volume = %config.base_volume.display(), trainer = %config.trainer.program, "worker configured");

    let worker = Worker::new(FineTuneHandler::from_config(&config), config.worker.clone());

    if let Some(path) = args.test_input {
        let output = worker.run_local(&path).await?;
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = &result {
                error!(error = %e, "worker stopped");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }
    Ok(())
}
