use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Peer wire frames
// ---------------------------------------------------------------------------

/// JSON frames exchanged with peers on a channel topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PeerFrame {
    /// Agent self-description
    Announce(AgentAnnounce),
    /// Application message
    Message(ChatFrame),
}

/// Announce payload: every field is optional, absent fields leave the
/// registry record untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentAnnounce {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatFrame {
    /// Identity claimed by the author (not verified).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl PeerFrame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Result of decoding bytes received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Announce(AgentAnnounce),
    Message(ChatFrame),
    /// Anything that is not a recognised frame, kept as an opaque value.
    Raw(Value),
}

pub fn decode_peer_frame(data: &[u8]) -> DecodedFrame {
    if let Ok(frame) = serde_json::from_slice::<PeerFrame>(data) {
        return match frame {
            PeerFrame::Announce(a) => DecodedFrame::Announce(a),
            PeerFrame::Message(m) => DecodedFrame::Message(m),
        };
    }

    if let Ok(value) = serde_json::from_slice::<Value>(data) {
        return DecodedFrame::Raw(value);
    }

    match std::str::from_utf8(data) {
        Ok(text) => DecodedFrame::Raw(Value::String(text.to_string())),
        Err(_) => DecodedFrame::Raw(serde_json::json!({
            "base64": base64::engine::general_purpose::STANDARD.encode(data),
        })),
    }
}

// ---------------------------------------------------------------------------
// Event envelope
// ---------------------------------------------------------------------------

/// State-change notifications pushed to local clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AgentJoin,
    AgentLeave,
    AgentDiscovered,
    ChannelJoined,
    ChannelLeft,
    Message,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AgentJoin => "agent-join",
            EventKind::AgentLeave => "agent-leave",
            EventKind::AgentDiscovered => "agent-discovered",
            EventKind::ChannelJoined => "channel-joined",
            EventKind::ChannelLeft => "channel-left",
            EventKind::Message => "message",
        }
    }
}

/// `{type, id, timestamp, payload}` wrapper used for events and
/// command-protocol replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn event(kind: EventKind, payload: Value) -> Self {
        Self::new(kind.as_str(), payload)
    }

    pub fn is_event(&self, kind: EventKind) -> bool {
        self.kind == kind.as_str()
    }

    pub fn to_text(&self) -> String {
        // Envelope holds only string keys and JSON values.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Relay protocol delivery
// ---------------------------------------------------------------------------

/// Message forwarded to a relay-protocol session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayDelivery {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Uuid,
    pub channel: String,
    pub from: String,
    pub message: Value,
    pub timestamp: DateTime<Utc>,
}

impl RelayDelivery {
    pub fn new(
        id: Uuid,
        channel: &str,
        from: &str,
        message: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: "message".to_string(),
            id,
            channel: channel.to_string(),
            from: from.to_string(),
            message,
            timestamp,
        }
    }
}
