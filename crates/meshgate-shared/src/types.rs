use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::CHANNEL_KEY_SIZE;

// Channel routing key = BLAKE3 digest of the channel name (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(pub [u8; CHANNEL_KEY_SIZE]);

impl ChannelKey {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != CHANNEL_KEY_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; CHANNEL_KEY_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    /// GossipSub topic name carrying this channel's traffic.
    pub fn to_topic(&self) -> String {
        self.to_hex()
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ChannelKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChannelKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// Transport identity of a remote peer (base58 libp2p peer id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerKey(pub String);

impl PeerKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Logical agent identity, independent of any single connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&PeerKey> for AgentId {
    fn from(peer: &PeerKey) -> Self {
        Self(peer.0.clone())
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role flags requested when joining a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinMode {
    /// Advertise ourselves as a member so others can find us.
    pub announce: bool,
    /// Actively look up other members.
    pub discover: bool,
}

impl Default for JoinMode {
    fn default() -> Self {
        Self {
            announce: true,
            discover: true,
        }
    }
}

/// Where an inbound peer message was heard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOrigin {
    /// Topic belongs to a channel we have joined.
    Known { name: String, key: ChannelKey },
    /// Topic we cannot map to a joined channel.
    Unknown { topic: String },
}

impl ChannelOrigin {
    /// Channel label used when archiving the message.
    pub fn label(&self) -> String {
        match self {
            ChannelOrigin::Known { name, .. } => name.clone(),
            ChannelOrigin::Unknown { topic } => {
                let short: String = topic.chars().take(8).collect();
                format!("unknown:{short}")
            }
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ChannelOrigin::Known { name, .. } => Some(name),
            ChannelOrigin::Unknown { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_key_hex_roundtrip() {
        let key = ChannelKey([7u8; 32]);
        assert_eq!(ChannelKey::from_hex(&key.to_hex()).unwrap(), key);
        assert_eq!(key.short().len(), 8);
        assert!(ChannelKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_channel_key_serializes_as_hex() {
        let key = ChannelKey([0xab; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
    }

    #[test]
    fn test_unknown_origin_label() {
        let origin = ChannelOrigin::Unknown {
            topic: "deadbeefcafebabe".into(),
        };
        assert_eq!(origin.label(), "unknown:deadbeef");
        assert_eq!(origin.name(), None);
    }

    #[test]
    fn test_default_agent_id_from_peer() {
        let peer = PeerKey::new("12D3KooWabc");
        assert_eq!(AgentId::from(&peer).as_str(), "12D3KooWabc");
    }
}
