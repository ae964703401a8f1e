use std::time::Duration;

use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
use libp2p::identity::Keypair;
use libp2p::kad::{self, store::MemoryStore};
use libp2p::{identify, SwarmBuilder};
use tracing::info;

use meshgate_shared::constants::{GOSSIPSUB_HEARTBEAT_SECS, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use meshgate_shared::crypto::derive_node_secret;

use crate::behaviour::MeshBehaviour;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Node keypair derived from an operator seed, or a fresh one.
pub fn keypair_from_secret(seed: Option<&[u8]>) -> anyhow::Result<Keypair> {
    match seed {
        Some(seed) => {
            let secret = derive_node_secret(seed);
            Keypair::ed25519_from_bytes(secret)
                .map_err(|e| anyhow::anyhow!("Failed to create node keypair: {e}"))
        }
        None => Ok(Keypair::generate_ed25519()),
    }
}

pub fn build_swarm(keypair: Keypair) -> anyhow::Result<libp2p::Swarm<MeshBehaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| -> Result<MeshBehaviour, BoxError> {
            let local_peer_id = key.public().to_peer_id();

            // Content-addressed ids so the same payload from the same
            // source is only delivered once.
            let message_id_fn = |message: &gossipsub::Message| {
                let mut hasher = blake3::Hasher::new();
                hasher.update(&message.data);
                if let Some(ref source) = message.source {
                    hasher.update(&source.to_bytes());
                }
                MessageId::from(hasher.finalize().to_hex().to_string())
            };

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(MAX_MESSAGE_SIZE)
                .message_id_fn(message_id_fn)
                .build()
                .map_err(|e| -> BoxError { format!("GossipSub config: {e}").into() })?;

            let gossipsub = gossipsub::Behaviour::new(
                MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| -> BoxError { format!("GossipSub init: {e}").into() })?;

            let store = MemoryStore::new(local_peer_id);
            let mut kademlia = kad::Behaviour::new(local_peer_id, store);
            kademlia.set_mode(Some(kad::Mode::Server));

            let identify_config = identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                .with_push_listen_addr_updates(true)
                .with_interval(Duration::from_secs(60));
            let identify = identify::Behaviour::new(identify_config);

            Ok(MeshBehaviour {
                gossipsub,
                kademlia,
                identify,
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(120)))
        .build();

    info!(
        peer_id = %swarm.local_peer_id(),
        "Built meshgate swarm with QUIC transport"
    );

    Ok(swarm)
}
