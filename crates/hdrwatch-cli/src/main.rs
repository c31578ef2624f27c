use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hdrwatch_sync::{parse_interval, CheckPipeline, CycleScheduler, WatchConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hdrwatch")]
#[command(about = "Flags Radarr/Sonarr imports that arrived in HDR on an SDR-only quality profile")]
#[command(version)]
struct Cli {
    /// Overrides CHECK_INTERVAL (e.g. `5m`, `1h 30m`).
    #[arg(long, global = true)]
    interval: Option<String>,
    /// Overrides HDRWATCH_CHECKPOINT_PATH.
    #[arg(long, global = true)]
    checkpoint: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check immediately, then again after every interval.
    Run,
    /// Run a single check and exit.
    Check,
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env_loaded = dotenvy::dotenv().is_ok();

    let mut config = WatchConfig::from_env().context("loading configuration")?;
    if let Some(raw) = &cli.interval {
        config.check_interval = parse_interval(raw)?;
    }
    if let Some(path) = cli.checkpoint {
        config.checkpoint_path = path;
    }

    init_tracing(config.debug);
    info!("starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    if env_loaded {
        info!("loaded .env file");
    }

    let pipeline = CheckPipeline::from_config(&config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!(
                interval = %humantime::format_duration(config.check_interval),
                checkpoint = %config.checkpoint_path.display(),
                "scheduler started"
            );
            CycleScheduler::new(pipeline, config.check_interval)
                .run_forever()
                .await;
        }
        Commands::Check => {
            let report = pipeline.run_cycle().await;
            let summary = report.outcome?;
            println!(
                "check complete: events={} records={} flagged={} notified={}",
                summary.history_events,
                summary.resolved_records,
                summary.flagged.len(),
                summary.notified
            );
        }
    }

    Ok(())
}
