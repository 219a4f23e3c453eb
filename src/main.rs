//! Chain Reaction Game Server
//!
//! Authoritative turn server for chain-reaction rooms.
//! Configuration comes from `CHAIN_*` environment variables, logging from `RUST_LOG`.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chain_reaction::{
    VERSION,
    network::{GameServer, ServerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let config = ServerConfig::from_env().context("invalid server configuration")?;

    info!("Chain Reaction Server v{}", VERSION);
    info!(
        "Grid: {}x{}, default room: {}",
        config.grid.rows, config.grid.columns, config.default_room
    );

    let server = std::sync::Arc::new(GameServer::new(config));

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
