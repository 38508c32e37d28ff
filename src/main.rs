//! Chatbridge - Telegram/Discord chat relay
//!
//! Runs one or more bridges. Each bridge links chats on two networks through
//! a persisted routing table and a pair of per-direction message queues.

mod bridge;
mod common;
mod config;
mod discord;
mod routing;
mod telegram;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use bridge::{Bridge, Endpoint};
use common::message::Messenger;
use config::{env::get_config_path, load_and_validate, BridgeConfig, Config, EndpointConfig, TransportKind};
use discord::DiscordAdapter;
use routing::RoutingStore;
use telegram::TelegramAdapter;
use transport::{MemoryQueue, SqliteQueue, Transport};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Chatbridge v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Data directory: {}", config.data_dir);
    for bridge in &config.bridges {
        info!(
            "  Bridge '{}': {} <-> {} ({:?} queues)",
            bridge.name, bridge.left.kind, bridge.right.kind, bridge.transport.kind
        );
    }

    // ============================================================
    // Build and start bridges
    // ============================================================
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(config.bridges.len());
    for bridge_config in &config.bridges {
        let bridge = build_bridge(&config, bridge_config)
            .with_context(|| format!("Failed to set up bridge '{}'", bridge_config.name))?;
        handles.push(tokio::spawn(bridge.run(shutdown_rx.clone())));
    }
    let mut bridges = futures::future::join_all(handles);

    // ============================================================
    // Run until a signal arrives or every bridge has stopped
    // ============================================================
    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - stopping bridges...");
            true
        }
        _ = &mut bridges => false,
    };

    if shutdown {
        if let Err(e) = shutdown_tx.send(true) {
            debug!("Shutdown channel closed (bridges already exited): {}", e);
        }
        match tokio::time::timeout(Duration::from_secs(5), &mut bridges).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("Bridge task panicked: {}", e);
                    }
                }
                info!("All bridges stopped gracefully");
            }
            Err(_) => warn!("Bridges did not stop within 5s"),
        }
    }

    info!("Exiting...");
    Ok(())
}

/// Wire a bridge from its configuration: routing store, queues and adapters.
fn build_bridge(config: &Config, bridge: &BridgeConfig) -> Result<Bridge> {
    let data_dir = config.data_path();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let store = Arc::new(RoutingStore::open(bridge.routing_path(&data_dir))?);

    let (left_queue, right_queue): (Arc<dyn Transport>, Arc<dyn Transport>) =
        match bridge.transport.kind {
            TransportKind::Sqlite => {
                let path = bridge.queue_path(&data_dir);
                (
                    Arc::new(SqliteQueue::open(&path, bridge.left_queue_name())?),
                    Arc::new(SqliteQueue::open(&path, bridge.right_queue_name())?),
                )
            }
            TransportKind::Memory => (
                Arc::new(MemoryQueue::new(bridge.left_queue_name())),
                Arc::new(MemoryQueue::new(bridge.right_queue_name())),
            ),
        };

    let left = build_endpoint(
        format!("{}/left", bridge.name),
        &bridge.left,
        Arc::clone(&store),
        Arc::clone(&left_queue),
    )?;
    let right = build_endpoint(
        format!("{}/right", bridge.name),
        &bridge.right,
        Arc::clone(&store),
        Arc::clone(&right_queue),
    )?;

    Ok(Bridge::new(&bridge.name, left, right, left_queue, right_queue))
}

fn build_endpoint(
    name: String,
    config: &EndpointConfig,
    store: Arc<RoutingStore>,
    outbound: Arc<dyn Transport>,
) -> Result<Arc<dyn Endpoint>> {
    let endpoint: Arc<dyn Endpoint> = match config.kind {
        Messenger::Telegram => Arc::new(TelegramAdapter::new(name, config.clone(), store, outbound)?),
        Messenger::Discord => Arc::new(DiscordAdapter::new(name, config.clone(), store, outbound)?),
    };
    Ok(endpoint)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
