//! Turn Relay Server
//!
//! Serves save uploads, downloads and chat for turn-based multiplayer games.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turn_relay::{MemoryStore, RelayServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    info!("Turn Relay Server v{}", VERSION);
    info!(
        "Lockout after {} failures for {:?}, sessions last {:?}",
        config.max_attempts, config.lock_duration, config.session_duration
    );
    if config.admin_password == ServerConfig::default().admin_password {
        warn!("Console admin is using the default password");
    }

    let server = Arc::new(RelayServer::new(config, Arc::new(MemoryStore::new())));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("server failed")?;
    info!("Server stopped");
    Ok(())
}
