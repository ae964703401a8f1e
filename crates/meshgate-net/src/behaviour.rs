//! Composed libp2p `NetworkBehaviour` for meshgate nodes.
//!
//! Combines GossipSub (channel traffic and membership), Kademlia (provider
//! records used to find other members of a channel) and Identify (protocol
//! negotiation and address exchange).

use libp2p::{
    gossipsub, identify,
    kad::{self, store::MemoryStore},
    swarm::NetworkBehaviour,
};

/// Composed network behaviour for meshgate nodes.
///
/// Construction is handled by [`super::transport::build_swarm`].
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "MeshEvent")]
pub struct MeshBehaviour {
    /// One topic per joined channel
    pub gossipsub: gossipsub::Behaviour,
    /// Channel rendezvous via provider records
    pub kademlia: kad::Behaviour<MemoryStore>,
    /// Protocol identification and listen-address exchange
    pub identify: identify::Behaviour,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum MeshEvent {
    Gossipsub(gossipsub::Event),
    Kademlia(kad::Event),
    Identify(identify::Event),
}

impl From<gossipsub::Event> for MeshEvent {
    fn from(event: gossipsub::Event) -> Self {
        MeshEvent::Gossipsub(event)
    }
}

impl From<kad::Event> for MeshEvent {
    fn from(event: kad::Event) -> Self {
        MeshEvent::Kademlia(event)
    }
}

impl From<identify::Event> for MeshEvent {
    fn from(event: identify::Event) -> Self {
        MeshEvent::Identify(event)
    }
}
