//! Wagerbook server binary
//!
//! Opens the market store, audits the ledger, keeps the balance projection
//! fresh and waits for ctrl-c. Front ends embed [`wagerbook_market::Market`].

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wagerbook_market::{Config, LogFormat, LogNotifier, Market};

fn load_config() -> anyhow::Result<Config> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config)?;

    tracing::info!("Starting Wagerbook server");

    let market = Market::open_with_notifier(config, Arc::new(LogNotifier))
        .await
        .context("opening market store")?;

    let report = market.verify_chain().await?;
    if !report.is_valid() {
        anyhow::bail!("hash chain broken at {:?}", report.first_broken);
    }
    let mismatches = market.ledger().verify_balances().await?;
    if !mismatches.is_empty() {
        anyhow::bail!("{} balance aggregates disagree with the entries", mismatches.len());
    }
    tracing::info!(transactions = report.transactions_checked, "Ledger audit passed");

    let projection = market.start_projection();

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down Wagerbook server");
    projection.shutdown().await?;
    Ok(())
}
