//! Quota Ledger Daemon
//!
//! Opens the ledger database and runs the refresh sweeper until shutdown.
//! Event apply/rollback and quota views are driven by the embedding service;
//! this binary keeps scheduled resets happening on hosts where nothing else
//! is running.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! quota-ledger
//!
//! # Start with custom config
//! quota-ledger --config /path/to/config.toml
//!
//! # Override the database path and sweep cadence
//! quota-ledger --db-path /data/quota.db --sweep-interval-secs 60
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use quota_ledger::{Config, LedgerDb, RefreshSchedule, RefreshSweeper};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quota-ledger")]
#[command(about = "Reward quota ledger daemon")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ledger database path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Sweeper tick interval in seconds
    #[arg(long)]
    sweep_interval_secs: Option<u64>,

    /// Reference timezone offset, e.g. "+09:00"
    #[arg(long, env = "QUOTA_REFERENCE_OFFSET")]
    reference_offset: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    if let Some(secs) = args.sweep_interval_secs {
        config.sweep_interval_secs = secs;
    }
    if let Some(offset) = args.reference_offset {
        config.reference_offset = offset;
    }

    let offset = config.reference_offset()?;
    let schedule = RefreshSchedule::new(offset);

    let db = Arc::new(LedgerDb::open(&config.db_path)?);
    let stats = db.stats()?;
    info!(
        definitions = stats.definition_count,
        ledger_rows = stats.ledger_row_count,
        pending_refresh = stats.pending_refresh_count,
        "ledger database opened"
    );

    let sweeper = Arc::new(RefreshSweeper::new(
        db,
        schedule,
        config.sweep_interval(),
        config.log_cooldown(),
    ));
    sweeper.clone().start().await;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received");
    sweeper.stop().await;

    Ok(())
}
