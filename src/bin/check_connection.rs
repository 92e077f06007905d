//! Connectivity diagnostic: authenticate, ping, pull one tick per instrument
//! Usage: cargo run --bin check_connection
use anyhow::Context;
use tracing::{error, info};

use tickfetch::api::{BatchFetcher, Connector, Session};
use tickfetch::config::load_from_env;
use tickfetch::utils::{format_epoch, init_tracing};
use tickfetch::{Config, Credential};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_from_env()?;
    init_tracing(&config.log_level, config.log_format);

    info!("🔌 Connection check");
    info!("============================================");
    info!("Endpoint: {}", config.api_url);

    let credential = Credential::from_env(&config.credential_env)
        .with_context(|| format!("reading credential from ${}", config.credential_env))?;
    info!("Credential: {}", credential.masked());

    let connector = Connector::websocket(&config, Some(credential));
    let mut session = connector.connect().await.context("connecting")?;
    info!("✅ Connected and authenticated");

    let result = exercise(&config, &mut session).await;
    session.close().await;

    if let Err(e) = &result {
        error!("❌ Connection check failed: {:#}", e);
    }
    result
}

async fn exercise(config: &Config, session: &mut Session) -> anyhow::Result<()> {
    session.ping().await.context("ping")?;
    info!("✅ Ping answered");

    let fetcher = BatchFetcher::from_config(config);
    for instrument in &config.instruments {
        let batch = fetcher
            .fetch(session, instrument, 1, None)
            .await
            .with_context(|| format!("fetching latest tick for {}", instrument))?;

        match batch.ticks().last() {
            Some(tick) => info!(
                "   {}: {} @ {} ({})",
                instrument,
                tick.price,
                tick.epoch,
                format_epoch(tick.epoch)
            ),
            None => info!("   {}: no ticks available", instrument),
        }
    }

    info!("✅ All {} instruments reachable", config.instruments.len());
    Ok(())
}
