//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use meshgate_shared::constants::{
    APP_NAME, DEFAULT_ARCHIVE_CAPACITY, DEFAULT_AUTO_JOIN, DEFAULT_HTTP_PORT,
    DEFAULT_PUBLIC_CHANNELS, DEFAULT_QUIC_PORT, DEFAULT_SESSION_BUFFER,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// UDP port for the QUIC peer transport.
    /// Env: `LISTEN_PORT`
    /// Default: `4001`
    pub listen_port: u16,

    /// Socket address for HTTP queries and the `/ws` client endpoint.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Number of messages retained by the archive.
    /// Env: `ARCHIVE_CAPACITY`
    /// Default: `1000`
    pub archive_capacity: usize,

    /// Shared secret local clients must present before any other command.
    /// Env: `AUTH_TOKEN`
    /// Default: empty (gate disabled).
    pub auth_token: Option<String>,

    /// Channel names eligible for cross-transport relay.
    /// Env: `PUBLIC_CHANNELS` (comma-separated)
    pub public_channels: Vec<String>,

    /// Channels joined at startup.
    /// Env: `AUTO_JOIN` (comma-separated)
    pub auto_join: Vec<String>,

    /// File of bootstrap multiaddrs, one per line.
    /// Env: `BOOTSTRAP_PEERS`
    pub bootstrap_peers_path: Option<PathBuf>,

    /// Seed for a stable node identity (hex, 64 chars).
    /// Env: `NODE_SEED`
    /// Default: none (fresh identity per process).
    pub node_seed: Option<[u8; 32]>,

    /// Name reported by the info descriptor.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Agents unseen for this many seconds are evicted (0 = never).
    /// Env: `AGENT_TTL_SECS`
    pub agent_ttl_secs: u64,

    /// Outbound queue depth per client session.
    /// Env: `SESSION_BUFFER`
    pub session_buffer: usize,
}

// Hand-written so the token and seed never reach the logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_port", &self.listen_port)
            .field("http_addr", &self.http_addr)
            .field("archive_capacity", &self.archive_capacity)
            .field("auth_enabled", &self.auth_token.is_some())
            .field("public_channels", &self.public_channels)
            .field("auto_join", &self.auto_join)
            .field("bootstrap_peers_path", &self.bootstrap_peers_path)
            .field("seeded_identity", &self.node_seed.is_some())
            .field("instance_name", &self.instance_name)
            .field("agent_ttl_secs", &self.agent_ttl_secs)
            .field("session_buffer", &self.session_buffer)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            archive_capacity: DEFAULT_ARCHIVE_CAPACITY,
            auth_token: None,
            public_channels: DEFAULT_PUBLIC_CHANNELS.iter().map(|s| s.to_string()).collect(),
            auto_join: DEFAULT_AUTO_JOIN.iter().map(|s| s.to_string()).collect(),
            bootstrap_peers_path: None,
            node_seed: None,
            instance_name: APP_NAME.to_string(),
            agent_ttl_secs: 0,
            session_buffer: DEFAULT_SESSION_BUFFER,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("LISTEN_PORT") {
            match val.parse::<u16>() {
                Ok(port) => config.listen_port = port,
                Err(_) => tracing::warn!(value = %val, "Invalid LISTEN_PORT, using default"),
            }
        }

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(val) = lookup("ARCHIVE_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.archive_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid ARCHIVE_CAPACITY, using default"),
            }
        }

        if let Some(token) = lookup("AUTH_TOKEN") {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }

        if let Some(val) = lookup("PUBLIC_CHANNELS") {
            config.public_channels = parse_list(&val);
        }

        if let Some(val) = lookup("AUTO_JOIN") {
            config.auto_join = parse_list(&val);
        }

        if let Some(path) = lookup("BOOTSTRAP_PEERS") {
            if !path.is_empty() {
                config.bootstrap_peers_path = Some(PathBuf::from(path));
            }
        }

        if let Some(hex_seed) = lookup("NODE_SEED") {
            match parse_hex_seed(&hex_seed) {
                Ok(seed) => config.node_seed = Some(seed),
                Err(e) => tracing::warn!(error = %e, "Invalid NODE_SEED, using a fresh identity"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(val) = lookup("AGENT_TTL_SECS") {
            match val.parse::<u64>() {
                Ok(n) => config.agent_ttl_secs = n,
                Err(_) => tracing::warn!(value = %val, "Invalid AGENT_TTL_SECS, eviction disabled"),
            }
        }

        if let Some(val) = lookup("SESSION_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.session_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid SESSION_BUFFER, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

/// Split a comma-separated list, trimming blanks and dropping duplicates.
fn parse_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !out.iter().any(|existing| existing == item) {
            out.push(item.to_string());
        }
    }
    out
}

/// Parse a 64-character hex string into a 32-byte seed.
fn parse_hex_seed(hex: &str) -> Result<[u8; 32], String> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex.len()));
    }
    let bytes = hex::decode(hex).map_err(|e| format!("invalid hex: {e}"))?;
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&bytes);
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.archive_capacity, 1000);
        assert!(config.auth_token.is_none());
        assert!(config.public_channels.contains(&"agent-marketplace".to_string()));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("ARCHIVE_CAPACITY", "50"),
            ("AUTH_TOKEN", "secret"),
            ("PUBLIC_CHANNELS", "a, b,,a"),
            ("AUTO_JOIN", ""),
            ("AGENT_TTL_SECS", "3600"),
        ]));
        assert_eq!(config.archive_capacity, 50);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.public_channels, vec!["a", "b"]);
        assert!(config.auto_join.is_empty());
        assert_eq!(config.agent_ttl_secs, 3600);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("ARCHIVE_CAPACITY", "0"),
            ("AUTH_TOKEN", ""),
            ("HTTP_ADDR", "nonsense"),
            ("NODE_SEED", "abcd"),
        ]));
        assert_eq!(config.archive_capacity, 1000);
        assert!(config.auth_token.is_none());
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.node_seed.is_none());
    }

    #[test]
    fn test_parse_hex_seed() {
        let seed = parse_hex_seed(&"ab".repeat(32)).unwrap();
        assert_eq!(seed, [0xab; 32]);
        assert!(parse_hex_seed("abcd").is_err());
        assert!(parse_hex_seed(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_debug_hides_token() {
        let config = ServerConfig {
            auth_token: Some("hunter2".into()),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("auth_enabled: true"));
    }
}
