//! `CareChat` relay: streaming message relay plus conversation history.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin carechat-relay -- --config relay.toml
//!
//! # Custom address
//! cargo run --bin carechat-relay -- --config relay.toml --bind 127.0.0.1:8080
//! ```

use std::sync::Arc;

use carechat_relay::config::{RelayCliArgs, RelayConfig};
use carechat_relay::relay;
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let state = Arc::new(config.build_state());
    if state.directory.is_empty() {
        tracing::warn!("no accounts configured; every connection will be rejected");
    }
    tracing::info!(addr = %config.bind_addr, participants = state.directory.len(), "starting carechat relay");

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay");
            std::process::exit(1);
        }
    }
}
