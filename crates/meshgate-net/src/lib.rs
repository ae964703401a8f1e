// Peer-to-peer substrate built on libp2p with QUIC transport.
//
// Channels map to GossipSub topics; Kademlia provider records stand in for
// rendezvous so peers on the same channel can find each other.

pub mod behaviour;
pub mod discovery;
pub mod swarm;
pub mod transport;

pub use behaviour::{MeshBehaviour, MeshEvent};
pub use discovery::{load_bootstrap_peers, parse_bootstrap_list};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};
pub use transport::{build_swarm, keypair_from_secret};
