//! # meshgate-registry
//!
//! In-memory state tables behind the relay: joined channels, live peers,
//! discovered agents, the bounded message archive and activity counters.
//!
//! Every table is a plain owned struct mutated through `&mut self`. The
//! tables do no I/O and know nothing about the transports; the server's
//! hub owns one instance of each and is their only mutator.

pub mod activity;
pub mod agents;
pub mod archive;
pub mod peers;
pub mod topics;

mod error;

pub use activity::{
    ActivityCounters, ActivityEvent, ActivitySnapshot, ActivityTracker, Cardinalities,
    HourlySummary,
};
pub use agents::{Agent, AgentRegistry, AgentSighting, Registration};
pub use archive::{MessageArchive, MessageKind, MessagePage, MessageQuery, MessageRecord};
pub use error::RegistryError;
pub use peers::{PeerRecord, PeerTable};
pub use topics::{Channel, ChannelSummary, JoinOutcome, TopicTable};
