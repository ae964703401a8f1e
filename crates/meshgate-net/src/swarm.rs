//! Swarm orchestration with the tokio mpsc command/notification pattern.
//!
//! The swarm event loop runs in a dedicated tokio task. The relay engine
//! talks to it only through [`SwarmCommand`] and hears back only through
//! [`SwarmNotification`], so nothing outside this crate touches libp2p
//! types beyond peer ids and addresses.

use std::path::PathBuf;

use futures::StreamExt;
use libp2p::{
    gossipsub, identify,
    kad::{self, GetProvidersOk, QueryResult, RecordKey},
    swarm::SwarmEvent,
    Multiaddr, PeerId, Swarm,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use meshgate_shared::constants::DEFAULT_QUIC_PORT;

use crate::behaviour::{MeshBehaviour, MeshEvent};
use crate::discovery::{extract_peer_id, load_bootstrap_peers};
use crate::transport::build_swarm;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    /// Dial a remote peer at the given multiaddr.
    Dial(Multiaddr),
    /// Subscribe to a channel topic. `announce` publishes a provider
    /// record for it, `discover` looks up and dials existing providers.
    Join {
        topic: String,
        announce: bool,
        discover: bool,
    },
    /// Unsubscribe from a channel topic and withdraw its provider record.
    Leave { topic: String },
    /// Publish bytes on a channel topic.
    Publish { topic: String, data: Vec<u8> },
    /// Gracefully shut down the swarm.
    Shutdown,
}

/// Notifications sent *from* the swarm task to the application.
#[derive(Debug, Clone)]
pub enum SwarmNotification {
    /// First connection to a peer established.
    PeerConnected {
        peer_id: PeerId,
        address: Multiaddr,
        /// We dialed the peer.
        initiator: bool,
    },
    /// Last connection to a peer closed.
    PeerDisconnected { peer_id: PeerId },
    /// A peer subscribed to a topic.
    PeerSubscribed { peer_id: PeerId, topic: String },
    /// A peer unsubscribed from a topic.
    PeerUnsubscribed { peer_id: PeerId, topic: String },
    /// A GossipSub message was received.
    MessageReceived {
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
}

/// Configuration for spawning the swarm.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Path to the bootstrap peers file.
    pub bootstrap_peers_path: Option<PathBuf>,
    /// Port to listen on (defaults to `DEFAULT_QUIC_PORT`).
    pub listen_port: u16,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            bootstrap_peers_path: None,
            listen_port: DEFAULT_QUIC_PORT,
        }
    }
}

/// Spawn the libp2p swarm in a background tokio task.
///
/// # Returns
///
/// `(command_tx, notification_rx, local_peer_id)`
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    let listen_v4: Multiaddr = format!("/ip4/0.0.0.0/udp/{}/quic-v1", config.listen_port).parse()?;
    let listen_v6: Multiaddr = format!("/ip6/::/udp/{}/quic-v1", config.listen_port).parse()?;
    swarm.listen_on(listen_v4)?;
    swarm.listen_on(listen_v6)?;

    info!(peer_id = %local_peer_id, port = config.listen_port, "Swarm listening");

    if let Some(ref path) = config.bootstrap_peers_path {
        let bootstrap_addrs = load_bootstrap_peers(path);
        for addr in &bootstrap_addrs {
            if let Some(peer_id) = extract_peer_id(addr) {
                swarm
                    .behaviour_mut()
                    .kademlia
                    .add_address(&peer_id, addr.clone());
            }
            if let Err(e) = swarm.dial(addr.clone()) {
                warn!(addr = %addr, error = %e, "Failed to dial bootstrap peer");
            }
        }

        if !bootstrap_addrs.is_empty() {
            if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
                warn!(error = %e, "Kademlia bootstrap failed to start");
            }
        }
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SwarmNotification>(256);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        Some(cmd) => handle_command(&mut swarm, cmd),
                        None => {
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }

                event = swarm.select_next_some() => {
                    if let Some(notification) = handle_event(&mut swarm, event) {
                        if notif_tx.send(notification).await.is_err() {
                            info!("Notification receiver dropped, shutting down swarm");
                            break;
                        }
                    }
                }
            }
        }

        info!("Swarm event loop terminated");
    });

    Ok((cmd_tx, notif_rx, local_peer_id))
}

fn handle_command(swarm: &mut Swarm<MeshBehaviour>, cmd: SwarmCommand) {
    match cmd {
        SwarmCommand::Dial(addr) => {
            if let Err(e) = swarm.dial(addr.clone()) {
                error!(addr = %addr, error = %e, "Dial failed");
            }
        }
        SwarmCommand::Join {
            topic,
            announce,
            discover,
        } => {
            let ident = gossipsub::IdentTopic::new(&topic);
            if let Err(e) = swarm.behaviour_mut().gossipsub.subscribe(&ident) {
                error!(topic = %topic, error = %e, "Subscribe failed");
                return;
            }
            let key = RecordKey::new(&topic);
            if announce {
                if let Err(e) = swarm.behaviour_mut().kademlia.start_providing(key.clone()) {
                    warn!(topic = %topic, error = ?e, "Failed to announce channel");
                }
            }
            if discover {
                swarm.behaviour_mut().kademlia.get_providers(key);
            }
            debug!(topic = %topic, announce, discover, "Joined channel topic");
        }
        SwarmCommand::Leave { topic } => {
            let ident = gossipsub::IdentTopic::new(&topic);
            if let Err(e) = swarm.behaviour_mut().gossipsub.unsubscribe(&ident) {
                warn!(topic = %topic, error = %e, "Unsubscribe failed");
            }
            swarm
                .behaviour_mut()
                .kademlia
                .stop_providing(&RecordKey::new(&topic));
            debug!(topic = %topic, "Left channel topic");
        }
        SwarmCommand::Publish { topic, data } => {
            let ident = gossipsub::IdentTopic::new(&topic);
            if let Err(e) = swarm.behaviour_mut().gossipsub.publish(ident, data) {
                // No subscribed peers yet is routine for a fresh channel.
                debug!(topic = %topic, error = %e, "Publish failed");
            }
        }
        SwarmCommand::Shutdown => {}
    }
}

fn handle_event(
    swarm: &mut Swarm<MeshBehaviour>,
    event: SwarmEvent<MeshEvent>,
) -> Option<SwarmNotification> {
    match event {
        SwarmEvent::Behaviour(MeshEvent::Gossipsub(gossipsub::Event::Message { message, .. })) => {
            let topic = message.topic.to_string();
            debug!(
                topic = %topic,
                source = ?message.source,
                len = message.data.len(),
                "GossipSub message received"
            );
            Some(SwarmNotification::MessageReceived {
                source: message.source,
                topic,
                data: message.data,
            })
        }

        SwarmEvent::Behaviour(MeshEvent::Gossipsub(gossipsub::Event::Subscribed {
            peer_id,
            topic,
        })) => {
            Some(SwarmNotification::PeerSubscribed {
                peer_id,
                topic: topic.to_string(),
            })
        }

        SwarmEvent::Behaviour(MeshEvent::Gossipsub(gossipsub::Event::Unsubscribed {
            peer_id,
            topic,
        })) => {
            Some(SwarmNotification::PeerUnsubscribed {
                peer_id,
                topic: topic.to_string(),
            })
        }

        SwarmEvent::Behaviour(MeshEvent::Kademlia(kad::Event::OutboundQueryProgressed {
            result: QueryResult::GetProviders(Ok(GetProvidersOk::FoundProviders { providers, .. })),
            ..
        })) => {
            let local = *swarm.local_peer_id();
            for provider in providers {
                if provider == local || swarm.is_connected(&provider) {
                    continue;
                }
                debug!(peer = %provider, "Dialing channel provider");
                if let Err(e) = swarm.dial(provider) {
                    debug!(peer = %provider, error = %e, "Failed to dial provider");
                }
            }
            None
        }

        SwarmEvent::Behaviour(MeshEvent::Kademlia(kad::Event::OutboundQueryProgressed {
            result,
            ..
        })) => {
            debug!(result = ?result, "Kademlia query progressed");
            None
        }

        SwarmEvent::Behaviour(MeshEvent::Identify(identify::Event::Received {
            peer_id,
            info,
            ..
        })) => {
            debug!(
                peer = %peer_id,
                protocol = ?info.protocol_version,
                "Identify: received info from peer"
            );
            for addr in &info.listen_addrs {
                swarm
                    .behaviour_mut()
                    .kademlia
                    .add_address(&peer_id, addr.clone());
            }
            None
        }

        SwarmEvent::ConnectionEstablished {
            peer_id,
            endpoint,
            num_established,
            ..
        } => {
            if num_established.get() != 1 {
                return None;
            }
            let address = endpoint.get_remote_address().clone();
            let initiator = endpoint.is_dialer();
            info!(peer = %peer_id, addr = %address, initiator, "Peer connected");
            Some(SwarmNotification::PeerConnected {
                peer_id,
                address,
                initiator,
            })
        }

        SwarmEvent::ConnectionClosed {
            peer_id,
            num_established,
            ..
        } => {
            if num_established != 0 {
                return None;
            }
            info!(peer = %peer_id, "Peer disconnected");
            Some(SwarmNotification::PeerDisconnected { peer_id })
        }

        SwarmEvent::NewListenAddr { address, .. } => {
            info!(addr = %address, "Listening on new address");
            None
        }

        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
            None
        }

        SwarmEvent::IncomingConnectionError { error, .. } => {
            warn!(error = %error, "Incoming connection error");
            None
        }

        _ => None,
    }
}
