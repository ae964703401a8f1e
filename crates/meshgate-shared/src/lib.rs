//! Types shared by every meshgate crate: identifiers, channel-key
//! derivation, peer wire frames, local-client command grammar and the
//! event envelope.

pub mod commands;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::RelayError;
pub use types::{AgentId, ChannelKey, ChannelOrigin, JoinMode, PeerKey};
