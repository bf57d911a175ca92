//! Agora chat relay
//!
//! Serves the room HTTP API and the `/chat/{room_id}` WebSocket endpoint.
//!
//! Usage:
//!   agora-relay                                  # in-memory store on 127.0.0.1:5000
//!   agora-relay --database-url sqlite://chat.db  # persistent store
//!   RUST_LOG=debug agora-relay --max-workers 4

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agora_relay::{AgentRegistry, RelayConfig, RelayServer, open_store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap reads environment fallbacks
    dotenvy::dotenv().ok();
    let config = RelayConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    config.validate().context("invalid configuration")?;

    info!("Starting Agora chat relay...");
    info!("Configuration:");
    info!("  - Bind address: {}", config.bind_addr);
    info!(
        "  - Store: {}",
        config.database_url.as_deref().unwrap_or("in-memory")
    );
    info!("  - Max workers: {}", config.max_workers);
    match config.shutdown_timeout() {
        Some(limit) => info!("  - Shutdown drain limit: {:?}", limit),
        None => info!("  - Shutdown drain limit: none"),
    }

    let store = open_store(config.database_url.as_deref()).context("failed to open store")?;
    let agents = AgentRegistry::with_builtin(config.weather_delay());
    info!("  - Agents: {}", agents.len());

    let server = Arc::new(RelayServer::new(config, store, agents));

    let signals = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            wait_for_signal().await;
            server.shutdown().await;
        })
    };

    server.serve().await.context("server error")?;
    signals.abort();

    info!("Agora chat relay exited");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
