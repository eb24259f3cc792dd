//! Bazaar room relay: real-time chat for marketplace listings.
//!
//! An axum WebSocket server where clients join rooms and broadcast messages
//! to everyone else in the same room. Membership lives in memory only.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:4000
//! cargo run --bin bazaar-relay
//!
//! # Run on custom address
//! cargo run --bin bazaar-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! BAZAAR_ADDR=127.0.0.1:8080 cargo run --bin bazaar-relay
//! ```

use std::sync::Arc;

use bazaar_relay::config::{RelayCliArgs, RelayConfig};
use bazaar_relay::logging;
use bazaar_relay::relay::RelayState;
use bazaar_relay::server;
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

    let _log_guard = logging::init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!(
        addr = %config.bind_addr,
        echo_to_sender = config.echo_to_sender,
        "starting bazaar relay server"
    );

    let state = Arc::new(RelayState::with_settings(config.relay_settings()));

    match server::start_server_with_shutdown(&config.bind_addr, state, shutdown_signal()).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
