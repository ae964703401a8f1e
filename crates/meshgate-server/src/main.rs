//! # meshgate-server
//!
//! Relay and registry node between local WebSocket clients and a libp2p
//! mesh.
//!
//! This binary provides:
//! - **Channel membership** on the mesh (gossipsub topics keyed by BLAKE3
//!   of the channel name, Kademlia provider records for rendezvous)
//! - **Peer and agent registries** fed by connection events and announce
//!   frames
//! - **Message archive** holding the most recent messages in memory
//! - **Cross-transport relay** limited to an allow-list of public channels
//! - **Query API** (axum) plus the `/ws` endpoint for local clients

mod api;
mod bridge;
mod config;
mod error;
mod fanout;
mod hub;
mod query;
mod relay;
mod session;
mod ws;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meshgate_net::{keypair_from_secret, spawn_swarm, SwarmCommand, SwarmConfig};
use meshgate_shared::{JoinMode, PeerKey};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::Hub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,meshgate_server=debug,meshgate_net=debug")
            }),
        )
        .init();

    info!("Starting meshgate v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Spawn the libp2p swarm (runs in background tokio task)
    // -----------------------------------------------------------------------
    let keypair = keypair_from_secret(config.node_seed.as_ref().map(|s| s.as_slice()))?;
    let swarm_config = SwarmConfig {
        bootstrap_peers_path: config.bootstrap_peers_path.clone(),
        listen_port: config.listen_port,
    };
    let (cmd_tx, notif_rx, local_peer_id) = spawn_swarm(keypair, swarm_config).await?;
    info!(peer_id = %local_peer_id, "Swarm started");

    // -----------------------------------------------------------------------
    // 4. Build the hub and join startup channels
    // -----------------------------------------------------------------------
    let hub = Hub::new(
        &config,
        PeerKey::new(local_peer_id.to_string()),
        Box::new(cmd_tx.clone()),
    );
    let hub = Arc::new(Mutex::new(hub));

    {
        let mut guard = hub.lock().await;
        for name in &config.auto_join {
            match guard.join_channel(name, JoinMode::default()) {
                Ok(outcome) => {
                    info!(channel = %name, key = %outcome.key().short(), "Auto-joined channel")
                }
                Err(e) => warn!(channel = %name, error = %e, "Failed to auto-join channel"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks
    // -----------------------------------------------------------------------
    tokio::spawn(bridge::notification_loop(hub.clone(), notif_rx));

    if config.agent_ttl_secs > 0 {
        tokio::spawn(bridge::sweep_loop(hub.clone(), config.agent_ttl_secs));
        info!(ttl_secs = config.agent_ttl_secs, "Agent eviction enabled");
    }

    // -----------------------------------------------------------------------
    // 6. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let app_state = AppState {
        hub,
        config: Arc::new(config),
    };

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    if cmd_tx.send(SwarmCommand::Shutdown).await.is_err() {
        warn!("Swarm task already stopped");
    }

    Ok(())
}
