//! Analysis Scheduler Main Entry Point

use analysis_scheduler::logging::init_logging;
use analysis_scheduler::{build_strategies, AnalysisScheduler, LoggingSignalSink};
use anyhow::{Context, Result};
use clap::Parser;
use config::{resolve_config_path, EngineConfig};
use state_context::{
    AnalyzerParams, BackgroundRefresher, ContextCoordinator, DefaultAnalyzers, InMemoryRepository,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "analysis_scheduler", about = "Clock-synchronized market analysis scheduler")]
struct Args {
    /// Configuration file (default: $ANALYSIS_ENGINE_CONFIG or configs/analysis_engine.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON candle file loaded into the in-memory repository
    #[arg(long)]
    candles: Option<PathBuf>,

    /// Run a single cycle, print its statistics and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| resolve_config_path("ANALYSIS_ENGINE_CONFIG", "configs/analysis_engine.toml"));
    let config = EngineConfig::load(Some(&config_path))
        .context("Failed to load analysis engine configuration")?;

    init_logging(&config.logging)?;
    info!("Starting analysis scheduler with config {:?}", config_path);

    let candles_path = args
        .candles
        .clone()
        .or_else(|| config.repository.candles_path.as_ref().map(PathBuf::from));
    let repository = Arc::new(match &candles_path {
        Some(path) => InMemoryRepository::from_json_file(path)
            .with_context(|| format!("Failed to load candles from {:?}", path))?,
        None => {
            warn!("No candle source configured, repository starts empty");
            InMemoryRepository::new()
        }
    });

    let coordinator = Arc::new(ContextCoordinator::with_system_clock(
        repository.clone(),
        Arc::new(DefaultAnalyzers::new(AnalyzerParams::default())),
        config.cache.clone(),
    ));
    let strategies = build_strategies(&config.scheduler.strategies, config.cache.exhaustion_threshold)?;
    let scheduler = AnalysisScheduler::new(
        config.scheduler.clone(),
        coordinator.clone(),
        repository,
        strategies,
        Arc::new(LoggingSignalSink::new()),
    );

    if args.once {
        let cycle = scheduler.run_cycle_once().await?;
        println!("{}", serde_json::to_string_pretty(&cycle)?);
        println!("{}", serde_json::to_string_pretty(&scheduler.stats())?);
        return Ok(());
    }

    scheduler.start().await?;
    let refresher = BackgroundRefresher::new(coordinator.clone(), config.refresh.clone());
    refresher.start();

    info!("Analysis scheduler running. Press Ctrl+C to stop.");
    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down analysis scheduler");
    scheduler.stop().await;
    refresher.stop().await;

    let health = coordinator.health();
    info!(
        contexts = health.contexts,
        success_rate = health.success_rate,
        "Context cache final state"
    );
    Ok(())
}
