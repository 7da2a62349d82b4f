//! # relaycode-signal
//!
//! The rendezvous/signaling server: a pure relay for opaque SDP/ICE strings
//! plus typed control messages. Owns no file content and persists nothing
//! across restarts.

mod api;
mod config;
mod rooms;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::SignalConfig;
use crate::rooms::Registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relaycode_signal=debug")),
        )
        .init();

    info!("starting relaycode signaling server v{}", env!("CARGO_PKG_VERSION"));

    let config = SignalConfig::from_env();
    info!(?config, "loaded configuration");

    let registry = Arc::new(Registry::new());

    tokio::select! {
        result = api::serve(registry, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "signaling server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
