//! pricetier daemon: polls the price feed, maintains the tiered store

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pricetier::admin::Maintenance;
use pricetier::clock::{SharedClock, SystemClock};
use pricetier::config::AppConfig;
use pricetier::feed::{SnapshotSource, WikiPriceClient};
use pricetier::ingest::IngestWriter;
use pricetier::persistence::Store;
use pricetier::scheduler::Scheduler;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(config.logging.json);

    info!("🚀 pricetier v{}", env!("CARGO_PKG_VERSION"));
    info!(config = %config.digest(), "⚙️ Configuration loaded");

    let store = Store::open(&config.store.path)
        .with_context(|| format!("Failed to open store at {}", config.store.path))?;
    let clock: SharedClock = Arc::new(SystemClock);

    let source: Arc<dyn SnapshotSource> =
        Arc::new(WikiPriceClient::new(&config.feed).context("Failed to build feed client")?);
    let writer = Arc::new(IngestWriter::new(
        store.clone(),
        clock.clone(),
        config.ingest.batch_size,
    ));
    let maintenance = Arc::new(Maintenance::new(
        store.clone(),
        clock.clone(),
        config.rollup.clone(),
        config.retention.clone(),
    ));

    let scheduler = Scheduler::start(
        source,
        writer,
        maintenance,
        Duration::from_secs(config.ingest.interval_secs),
        Duration::from_secs(config.maintenance.interval_secs),
        clock,
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("🛑 Shutdown requested, waiting for running jobs");

    if let Err(e) = scheduler.stop().await {
        warn!(error = %e, "Scheduler stopped with errors");
    }
    info!("👋 Bye");
    Ok(())
}
