//! snapkv - An In-Memory Redis-Compatible Server
//!
//! This is the main entry point for the snapkv server.
//! It loads the configured snapshot, starts the expiry sweeper, and
//! accepts client connections until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use snapkv::commands::CommandHandler;
use snapkv::config::ServerConfig;
use snapkv::connection::{handle_connection, ConnectionStats};
use snapkv::rdb;
use snapkv::storage::{ExpirySweeper, StorageEngine};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
snapkv v{} - In-Memory Redis-Compatible Server
──────────────────────────────────────────────────────────────
Server starting on {}

Use Ctrl+C to shutdown gracefully.
"#,
        snapkv::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    print_banner(&config);

    // Create the storage engine (shared across all connections)
    let storage = Arc::new(StorageEngine::new());
    for (key, value) in config.config_pairs() {
        storage.config_set(key, value);
    }
    info!("Storage engine initialized with 64 shards");

    if let Some(path) = config.snapshot_path() {
        if path.exists() {
            rdb::load_file(&path, &storage)
                .await
                .with_context(|| format!("failed to load snapshot {}", path.display()))?;
        } else {
            warn!(path = %path.display(), "Snapshot not found, starting with an empty keyspace");
        }
    }

    let _sweeper = ExpirySweeper::start(Arc::clone(&storage), config.expiry_config());

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    };

    tokio::select! {
        _ = accept_loop(listener, storage, stats) => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(&storage));
                let stats = Arc::clone(&stats);

                tokio::spawn(handle_connection(stream, addr, handler, stats));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
