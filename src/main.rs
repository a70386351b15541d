//! Apex-bot: ensemble-driven crypto decision bot.
//!
//! Single-binary Tokio application that:
//! 1. Maintains an OHLCV bar store (CSV bootstrap + persistence)
//! 2. Computes the feature matrix and market insight
//! 3. Trains and serves a stacked model ensemble
//! 4. Scores decisions and applies risk controls
//! 5. Tracks open positions with apex trailing exits

mod bot;
mod config;
mod memory;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use crate::bot::Bot;

/// Apex decision bot
#[derive(Parser)]
#[command(name = "apex-bot", about = "ensemble-driven crypto decision bot")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "apex.toml")]
    config: PathBuf,

    /// CSV bar history to bootstrap the bar store with.
    #[arg(long)]
    bars: Option<PathBuf>,

    /// Run a single evaluation cycle without ordering, then exit.
    #[arg(long)]
    dry_run: bool,

    /// Validate the configuration and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "apex_bot=info,bar_store=info,ensemble=info,decision_engine=info,\
                 risk_engine=info,apex_tracker=info,exchange_client=info"
                    .into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let explicit = cli.config != PathBuf::from("apex.toml");

    info!("apex-bot starting up...");

    let cfg = match config::load(&cli.config, explicit) {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if cli.check_config {
        info!(
            symbol = %cfg.trading.symbol,
            interval = %cfg.trading.interval,
            "configuration valid"
        );
        return Ok(());
    }

    info!(
        symbol = %cfg.trading.symbol,
        interval = %cfg.trading.interval,
        balance = cfg.trading.initial_balance,
        threshold = cfg.trading.threshold,
        "trading parameters"
    );
    info!(
        max_position_fraction = cfg.risk.max_position_fraction,
        max_drawdown_pct = cfg.risk.max_drawdown_pct,
        exposure_limit = cfg.risk.exposure_limit,
        "risk parameters"
    );
    info!(
        drop_duration_s = cfg.apex.drop_duration_seconds,
        tick_interval_s = cfg.apex.tick_interval_seconds,
        "apex parameters"
    );

    let (pressure, monitor) = memory::spawn_monitor(cfg.memory.clone());

    let bot = match Bot::new(cfg, cli.bars, pressure) {
        Ok(b) => b,
        Err(e) => {
            error!("startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let result = if cli.dry_run {
        let mut bot = bot;
        let r = bot.run_cycle(false).await;
        info!("dry run complete");
        r
    } else {
        bot.run().await
    };

    monitor.abort();
    if let Err(e) = &result {
        error!("bot exited with error: {}", e);
    }
    result.context("bot run failed")?;
    Ok(())
}
