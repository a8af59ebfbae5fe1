//! AltRates daemon binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use altrates_daemon::{DaemonConfig, RatesService};
use altrates_engine::RatesEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config = DaemonConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting altrates daemon");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let collaborators = altrates_feeds::collaborators(&config.feeds)?;
    let engine = Arc::new(RatesEngine::new(config.engine.clone(), collaborators));
    let trade_stream = config
        .trade_stream
        .then(|| altrates_feeds::trade_stream(&config.feeds));

    let service = RatesService::new(engine, trade_stream);
    service.start().await?;

    info!(
        baseline = %config.engine.baseline,
        fiats = config.engine.roster.fiats().len(),
        alts = config.engine.roster.alts().len(),
        trade_stream = config.trade_stream,
        "Daemon running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    service.stop().await?;
    info!("Daemon shutdown complete");
    Ok(())
}
