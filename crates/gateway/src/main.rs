//! Feed engine entry point.
//!
//! Loads the JSON config (first CLI argument, or the embedded default),
//! wires every configured exchange with the engine's reference JSON
//! dialect, and runs sessions until Ctrl-C. Deployments with real
//! exchange dialects register their own adapters instead.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use bookflow_core::ExchangeId;
use bookflow_gateway::application::{AdapterRegistry, ExchangeAdapter, ExchangeManager};
use bookflow_gateway::config::{ExchangeConfig, load_config, load_default_config};
use bookflow_gateway::infrastructure::{JsonFeedCodec, RestSnapshotFetcher, WsTransport};

fn reference_adapter(config: &ExchangeConfig) -> ExchangeAdapter {
    let codec = Arc::new(JsonFeedCodec::new(ExchangeId::new(config.id.as_str())));
    ExchangeAdapter {
        transport: Arc::new(WsTransport::new(
            config.ws_url.clone(),
            Arc::clone(&codec) as _,
            codec as _,
        )),
        fetcher: Arc::new(RestSnapshotFetcher::new(config.rest_url.clone())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("bookflow_gateway=info".parse()?))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(path)?,
        None => load_default_config()?,
    };

    let mut registry = AdapterRegistry::new();
    for exchange in &config.exchanges {
        registry = registry.register(exchange.id.as_str(), reference_adapter);
    }

    let manager = ExchangeManager::new(config, registry)?;
    let started = manager.start_all();
    tracing::info!("{} exchange sessions started", started);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    manager.shutdown_all().await;

    Ok(())
}
