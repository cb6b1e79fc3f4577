//! Roomcast chat server.
//!
//! Usage: `chat-server [config.toml]`. The path may also come from
//! `ROOMCAST_CONFIG`; with neither, the server starts with defaults (open
//! rooms, no tokens, no relay). Set `RUST_LOG` to adjust logging.

use roomcast::prelude::*;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ROOMCAST_CONFIG").ok());

    let config = match &config_path {
        Some(path) => RoomcastConfig::load(path).map_err(|e| {
            error!(path = %path, error = %e, "failed to load config");
            e
        })?,
        None => {
            info!("no config given, using defaults");
            RoomcastConfig::default()
        }
    };

    if config.tokens.is_empty() {
        tracing::warn!("no tokens configured, every connection will be refused");
    }

    let relay = AnyRelay::connect(config.relay.url.as_deref(), &config.relay.channel_prefix).await;
    info!(
        bind = %config.server.bind,
        relay = relay.kind(),
        tokens = config.tokens.len(),
        rooms = config.rooms.len(),
        "starting roomcast"
    );

    let services = Services::new(config.token_table()).with_membership(config.room_directory());

    if config.bot.enabled {
        serve(&config, services.with_responder(EchoResponder), relay).await
    } else {
        serve(&config, services, relay).await
    }
}

async fn serve<B: Responder>(
    config: &RoomcastConfig,
    services: Services<TokenTable, RoomDirectory, MemoryStore, B>,
    relay: AnyRelay,
) -> anyhow::Result<()> {
    let server = RoomcastServer::builder()
        .config(config)
        .build(services, relay)
        .await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await?;

    info!("server stopped");
    Ok(())
}
