use thiserror::Error;

/// Errors produced by registry lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No peer with this key is currently connected.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// No agent with this id has ever been seen (or it was evicted).
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// No joined channel matches this key or name.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RegistryError>;
