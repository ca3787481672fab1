//! Tezos delegation ingestion daemon.
//!
//! Backfills historical delegations from the TzKT API into a local SQLite
//! store, then polls for new ones until stopped.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (./data/delegations.db, api.tzkt.io, 30s polling)
//! tzdeleg-ingest
//!
//! # Load settings from a dotenv file first
//! tzdeleg-ingest --dotenv /etc/tzdeleg/ingest.env
//!
//! # Skip the historical backfill and poll a testnet indexer
//! HISTORICAL_INDEXING=false TZKT_API_URL=https://api.ghostnet.tzkt.io tzdeleg-ingest
//! ```
//!
//! # Graceful Shutdown
//!
//! The daemon handles SIGINT (Ctrl+C) and SIGTERM:
//! 1. Signals the engine to stop
//! 2. Lets the in-flight poll tick or backfill flush finish
//! 3. Logs a summary and exits

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tzdeleg_core::metrics::{init_metrics, set_gauge, start_metrics_server};
use tzdeleg_ingest::{
    Config, DelegationSource, EventStore, IngestionController, IngestionEngine, SqliteStore,
    TzktClient,
};

/// Tezos delegation ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "tzdeleg-ingest")]
#[command(about = "Backfill and poll Tezos delegations into a local store")]
#[command(version)]
struct Args {
    /// Dotenv file loaded before reading configuration
    #[arg(long, env = "DOTENV_PATH")]
    dotenv: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.dotenv {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load dotenv file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("tzdeleg_ingest=debug".parse().unwrap()),
        )
        .init();

    tracing::info!("Tezos delegation ingestion daemon starting...");
    let started = Instant::now();

    let config = Config::from_env().context("Invalid configuration")?;

    if let Some(port) = config.metrics_port {
        let handle = init_metrics();
        start_metrics_server(port, handle)
            .await
            .with_context(|| format!("Failed to start metrics server on port {port}"))?;
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        signal.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let store = Arc::new(
        SqliteStore::open(&config.database_path, config.store_call_timeout).with_context(|| {
            format!(
                "Failed to open delegation store at {}",
                config.database_path.display()
            )
        })?,
    );
    log_store_stats(store.as_ref()).await;

    let client = TzktClient::new(config.tzkt_config()).context("Failed to build TzKT client")?;
    tracing::info!("Using {} at {}", client.name(), client.base_url());

    let engine = Arc::new(IngestionEngine::new(
        Arc::new(client),
        store.clone(),
        config.engine_config(),
    ));
    let controller = IngestionController::new(engine.clone());

    controller.start()?;
    shutdown.cancelled().await;
    controller.stop().await.context("Ingestion ended with an error")?;

    let stored = store.count().await.unwrap_or_default();
    let cursor = store.read_cursor().await.unwrap_or_default();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Uptime:               {:?}", started.elapsed());
    tracing::info!("Delegations stored:   {}", stored);
    tracing::info!("Last indexed level:   {}", engine.last_indexed_level());
    tracing::info!("Cursor level:         {}", cursor.last_level);
    tracing::info!(
        "Cursor time:          {}",
        cursor
            .last_observed_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );

    Ok(())
}

/// Log what is already stored, when the store can tell.
async fn log_store_stats(store: &dyn EventStore) {
    let Some(provider) = store.stats_provider() else {
        return;
    };

    match provider.stats().await {
        Ok(stats) => {
            set_gauge("last_indexed_level", stats.highest_level as f64);
            tracing::info!(
                "Store holds {} delegations from {} delegators (total {} mutez), highest level {}",
                stats.total,
                stats.unique_delegators,
                stats.total_amount,
                stats.highest_level
            );
            if let (Some(oldest), Some(latest)) = (stats.oldest, stats.latest) {
                tracing::info!("Stored range: {} .. {}", oldest, latest);
            }
        }
        Err(e) => tracing::warn!("Failed to read store statistics: {}", e),
    }
}
