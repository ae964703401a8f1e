//! Local-client request grammar.
//!
//! Two protocols share the client socket: the structured relay protocol
//! (`{"action": ...}`) and the plain command protocol (`{"type": ...}`).
//! A session picks one from its first message and keeps it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, Result};
use crate::protocol::AgentAnnounce;
use crate::types::JoinMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientProtocol {
    Relay,
    Command,
}

impl ClientProtocol {
    /// Infer the protocol from the shape of a parsed message.
    pub fn detect(value: &Value) -> Option<Self> {
        if value.get("action").is_some_and(Value::is_string) {
            Some(ClientProtocol::Relay)
        } else if value.get("type").is_some_and(Value::is_string) {
            Some(ClientProtocol::Command)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Relay protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RelayRequest {
    Auth {
        token: String,
        agent_id: Option<String>,
    },
    Join {
        channel: String,
    },
    Leave {
        channel: String,
    },
    Send {
        channel: String,
        message: Value,
        metadata: Map<String, Value>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayFields {
    action: String,
    token: Option<String>,
    agent_id: Option<String>,
    channel: Option<String>,
    message: Option<Value>,
    payload: Option<Value>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl RelayRequest {
    pub fn from_value(value: Value) -> Result<Self> {
        let fields: RelayFields =
            serde_json::from_value(value).map_err(|e| RelayError::Malformed(e.to_string()))?;

        match fields.action.as_str() {
            "auth" | "authenticate" => Ok(RelayRequest::Auth {
                token: fields.token.ok_or(RelayError::MissingField("token"))?,
                agent_id: fields.agent_id,
            }),
            "join" | "subscribe" => Ok(RelayRequest::Join {
                channel: required_channel(fields.channel)?,
            }),
            "leave" | "unsubscribe" => Ok(RelayRequest::Leave {
                channel: required_channel(fields.channel)?,
            }),
            "send" | "publish" => Ok(RelayRequest::Send {
                channel: required_channel(fields.channel)?,
                message: fields
                    .message
                    .or(fields.payload)
                    .ok_or(RelayError::MissingField("message"))?,
                metadata: fields.metadata,
            }),
            other => Err(RelayError::UnknownCommand(other.to_string())),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, RelayRequest::Auth { .. })
    }
}

// ---------------------------------------------------------------------------
// Command protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CommandRequest {
    Auth { token: String },
    Ping,
    Join { channel: String, mode: JoinMode },
    Leave { channel: String },
    ListPeers,
    ListAgents,
    GetAgent { id: String },
    ListChannels,
    GetChannel { key: String },
    ListMessages {
        channel: Option<String>,
        sender: Option<String>,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    GetActivity,
    GetGraph,
    GetStats,
    GetInfo,
    ListClients,
    Announce(AgentAnnounce),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandFields {
    #[serde(rename = "type")]
    kind: String,
    token: Option<String>,
    channel: Option<String>,
    name: Option<String>,
    announce: Option<bool>,
    discover: Option<bool>,
    id: Option<String>,
    key: Option<String>,
    sender: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    agent_type: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl CommandRequest {
    pub fn from_value(value: Value) -> Result<Self> {
        let f: CommandFields =
            serde_json::from_value(value).map_err(|e| RelayError::Malformed(e.to_string()))?;

        let request = match f.kind.as_str() {
            "auth" | "authenticate" => CommandRequest::Auth {
                token: f.token.ok_or(RelayError::MissingField("token"))?,
            },
            "ping" => CommandRequest::Ping,
            "join" | "join-channel" => {
                let defaults = JoinMode::default();
                CommandRequest::Join {
                    channel: required_channel(f.channel.or(f.name))?,
                    mode: JoinMode {
                        announce: f.announce.unwrap_or(defaults.announce),
                        discover: f.discover.unwrap_or(defaults.discover),
                    },
                }
            }
            "leave" | "leave-channel" => CommandRequest::Leave {
                channel: required_channel(f.channel.or(f.name))?,
            },
            "list-peers" | "peers" => CommandRequest::ListPeers,
            "list-agents" | "agents" => CommandRequest::ListAgents,
            "get-agent" => CommandRequest::GetAgent {
                id: f.id.ok_or(RelayError::MissingField("id"))?,
            },
            "list-channels" | "channels" => CommandRequest::ListChannels,
            "get-channel" => CommandRequest::GetChannel {
                key: f.key.ok_or(RelayError::MissingField("key"))?,
            },
            "list-messages" | "messages" => CommandRequest::ListMessages {
                channel: f.channel,
                sender: f.sender,
                limit: f.limit,
                offset: f.offset,
            },
            "get-activity" | "activity" => CommandRequest::GetActivity,
            "get-graph" | "graph" => CommandRequest::GetGraph,
            "get-stats" | "stats" => CommandRequest::GetStats,
            "get-info" | "info" => CommandRequest::GetInfo,
            "list-clients" | "clients" => CommandRequest::ListClients,
            "announce" => CommandRequest::Announce(AgentAnnounce {
                id: f.id,
                name: f.name,
                agent_type: f.agent_type,
                capabilities: f.capabilities,
                metadata: f.metadata,
            }),
            other => return Err(RelayError::UnknownCommand(other.to_string())),
        };
        Ok(request)
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, CommandRequest::Auth { .. })
    }

    /// Name used for the reply envelope type (`<name>-result`).
    pub fn name(&self) -> &'static str {
        match self {
            CommandRequest::Auth { .. } => "auth",
            CommandRequest::Ping => "ping",
            CommandRequest::Join { .. } => "join",
            CommandRequest::Leave { .. } => "leave",
            CommandRequest::ListPeers => "list-peers",
            CommandRequest::ListAgents => "list-agents",
            CommandRequest::GetAgent { .. } => "get-agent",
            CommandRequest::ListChannels => "list-channels",
            CommandRequest::GetChannel { .. } => "get-channel",
            CommandRequest::ListMessages { .. } => "list-messages",
            CommandRequest::GetActivity => "get-activity",
            CommandRequest::GetGraph => "get-graph",
            CommandRequest::GetStats => "get-stats",
            CommandRequest::GetInfo => "get-info",
            CommandRequest::ListClients => "list-clients",
            CommandRequest::Announce(_) => "announce",
        }
    }
}

fn required_channel(channel: Option<String>) -> Result<String> {
    match channel {
        Some(c) if !c.is_empty() => Ok(c),
        _ => Err(RelayError::MissingField("channel")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_protocol() {
        assert_eq!(
            ClientProtocol::detect(&json!({"action": "auth"})),
            Some(ClientProtocol::Relay)
        );
        assert_eq!(
            ClientProtocol::detect(&json!({"type": "ping"})),
            Some(ClientProtocol::Command)
        );
        assert_eq!(ClientProtocol::detect(&json!({"type": 5})), None);
        assert_eq!(ClientProtocol::detect(&json!([1, 2])), None);
    }

    #[test]
    fn test_relay_send_requires_channel_and_message() {
        let err = RelayRequest::from_value(json!({"action": "send", "message": "x"})).unwrap_err();
        assert_eq!(err, RelayError::MissingField("channel"));

        let err = RelayRequest::from_value(json!({"action": "send", "channel": "a"})).unwrap_err();
        assert_eq!(err, RelayError::MissingField("message"));

        let req =
            RelayRequest::from_value(json!({"action": "publish", "channel": "a", "payload": 1}))
                .unwrap();
        assert!(matches!(req, RelayRequest::Send { ref channel, .. } if channel == "a"));
    }

    #[test]
    fn test_relay_auth_carries_agent_id() {
        let req =
            RelayRequest::from_value(json!({"action": "auth", "token": "t", "agentId": "bot"}))
                .unwrap();
        assert_eq!(
            req,
            RelayRequest::Auth {
                token: "t".into(),
                agent_id: Some("bot".into())
            }
        );
        assert!(req.is_auth());
    }

    #[test]
    fn test_unknown_action() {
        let err = RelayRequest::from_value(json!({"action": "dance"})).unwrap_err();
        assert_eq!(err.code(), "unknown-command");
    }

    #[test]
    fn test_command_join_defaults_and_name_alias() {
        let req = CommandRequest::from_value(json!({
            "type": "join",
            "name": "alpha",
            "discover": false
        }))
        .unwrap();
        assert_eq!(
            req,
            CommandRequest::Join {
                channel: "alpha".into(),
                mode: JoinMode {
                    announce: true,
                    discover: false
                }
            }
        );
    }

    #[test]
    fn test_command_join_without_name_is_missing_field() {
        let err = CommandRequest::from_value(json!({"type": "join"})).unwrap_err();
        assert_eq!(err, RelayError::MissingField("channel"));
    }

    #[test]
    fn test_command_wrong_field_type_is_malformed() {
        let err = CommandRequest::from_value(json!({"type": "list-messages", "limit": "ten"}))
            .unwrap_err();
        assert_eq!(err.code(), "malformed");
    }

    #[test]
    fn test_command_announce() {
        let req = CommandRequest::from_value(json!({
            "type": "announce",
            "id": "bot",
            "agentType": "worker",
            "capabilities": ["a", "b"]
        }))
        .unwrap();
        match req {
            CommandRequest::Announce(a) => {
                assert_eq!(a.id.as_deref(), Some("bot"));
                assert_eq!(a.agent_type.as_deref(), Some("worker"));
                assert_eq!(a.capabilities.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
