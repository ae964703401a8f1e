/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/meshgate/1.0.0";

/// Application name
pub const APP_NAME: &str = "meshgate";

/// Channel key size in bytes (BLAKE3 output)
pub const CHANNEL_KEY_SIZE: usize = 32;

/// Maximum peer message size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4001;

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default number of messages kept by the archive
pub const DEFAULT_ARCHIVE_CAPACITY: usize = 1000;

/// Default page size for message queries
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Default per-session outbound queue depth
pub const DEFAULT_SESSION_BUFFER: usize = 256;

/// Channels eligible for cross-transport relay when none are configured
pub const DEFAULT_PUBLIC_CHANNELS: &[&str] = &["agent-marketplace", "agent-discovery", "public"];

/// Channels joined at startup when none are configured
pub const DEFAULT_AUTO_JOIN: &[&str] = &["agent-marketplace"];

/// Hourly activity buckets kept once bucket eviction is enabled
pub const ACTIVITY_RETENTION_HOURS: i64 = 24 * 7;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_CHANNEL_TOPIC: &str = "meshgate-channel-topic-v1";
pub const KDF_CONTEXT_NODE_KEYPAIR: &str = "meshgate-node-keypair-v1";
