//! Cross-transport relay policy.
//!
//! Only channels on the public allow-list cross between local clients and
//! peers. Inbound traffic on any other channel is dropped with a log line;
//! outbound sends on any other channel are rejected back to the sender.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use meshgate_registry::{ActivityEvent, MessageKind, MessageRecord};
use meshgate_shared::protocol::{ChatFrame, EventKind, PeerFrame, RelayDelivery};
use meshgate_shared::{JoinMode, RelayError};

use crate::fanout::SessionId;
use crate::hub::Hub;

/// Allow-list plus the relay sessions joined to each channel.
#[derive(Debug, Default)]
pub struct RelayPolicy {
    public: HashSet<String>,
    members: HashMap<String, BTreeSet<SessionId>>,
}

impl RelayPolicy {
    pub fn new<I>(public: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            public: public.into_iter().collect(),
            members: HashMap::new(),
        }
    }

    pub fn is_public(&self, channel: &str) -> bool {
        self.public.contains(channel)
    }

    pub fn public_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.public.iter().cloned().collect();
        names.sort();
        names
    }

    /// Returns `true` if the session was not already a member.
    pub fn add_member(&mut self, channel: &str, session: SessionId) -> bool {
        self.members
            .entry(channel.to_string())
            .or_default()
            .insert(session)
    }

    /// Returns `true` if the session was a member.
    pub fn remove_member(&mut self, channel: &str, session: &SessionId) -> bool {
        let Some(set) = self.members.get_mut(channel) else {
            return false;
        };
        let removed = set.remove(session);
        if set.is_empty() {
            self.members.remove(channel);
        }
        removed
    }

    /// Drop a closed session from every channel.
    pub fn remove_session(&mut self, session: &SessionId) {
        self.members.retain(|_, set| {
            set.remove(session);
            !set.is_empty()
        });
    }

    pub fn forget_channel(&mut self, channel: &str) {
        self.members.remove(channel);
    }

    pub fn members(&self, channel: &str) -> Vec<SessionId> {
        self.members
            .get(channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Hub {
    /// Forward a peer message to the relay sessions joined to `channel`.
    /// Returns how many sessions it was queued for.
    pub(crate) fn relay_inbound(&self, channel: &str, record: &MessageRecord, from: &str) -> usize {
        if !self.relay.is_public(channel) {
            debug!(channel = %channel, "Inbound message on private channel not relayed");
            return 0;
        }

        let delivery = RelayDelivery::new(
            record.id,
            channel,
            from,
            record.content.clone(),
            record.timestamp,
        );
        let Ok(text) = serde_json::to_string(&delivery) else {
            return 0;
        };

        self.relay
            .members(channel)
            .iter()
            .filter(|session| self.sessions.deliver(session, text.clone()))
            .count()
    }

    /// Publish a message from a local session onto the peer transport,
    /// archive it and hand it to the other local listeners.
    pub(crate) fn relay_outbound(
        &mut self,
        channel: &str,
        message: Value,
        mut metadata: Map<String, Value>,
        origin: SessionId,
    ) -> Result<Uuid, RelayError> {
        if !self.relay.is_public(channel) {
            warn!(channel = %channel, session = %origin, "Rejected send on private channel");
            return Err(RelayError::PolicyViolation(channel.to_string()));
        }

        let from = self
            .sessions
            .get(&origin)
            .and_then(|s| s.agent_id.as_ref())
            .map(|a| a.to_string())
            .unwrap_or_else(|| origin.origin());

        self.join_channel(channel, JoinMode::default())?;

        metadata.insert("origin".into(), Value::String("local".into()));
        let frame = PeerFrame::Message(ChatFrame {
            from: Some(from.clone()),
            content: message.clone(),
            metadata: metadata.clone(),
        });
        let data = frame
            .to_bytes()
            .map_err(|e| RelayError::Malformed(e.to_string()))?;
        self.publish(channel, data)?;

        let record = MessageRecord::new(channel, &from, message, MessageKind::Message)
            .with_metadata(metadata);
        let id = record.id;

        self.topics.record_message(channel, record.timestamp);
        self.activity.record(ActivityEvent::MessageSent {
            at: record.timestamp,
            sender: &from,
            channel,
        });

        let delivery = RelayDelivery::new(
            id,
            channel,
            &from,
            record.content.clone(),
            record.timestamp,
        );
        if let Ok(text) = serde_json::to_string(&delivery) {
            for session in self.relay.members(channel) {
                if session != origin {
                    self.sessions.deliver(&session, text.clone());
                }
            }
        }

        self.emit(
            EventKind::Message,
            serde_json::to_value(&record).unwrap_or(Value::Null),
        );
        self.archive.archive(record);

        debug!(channel = %channel, session = %origin, id = %id, "Relayed local message to peers");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::testing::*;
    use meshgate_shared::crypto::derive_channel_key;
    use meshgate_shared::PeerKey;
    use serde_json::json;

    #[test]
    fn test_policy_membership() {
        let mut policy = RelayPolicy::new(vec!["public".to_string()]);
        let a = SessionId::new();
        let b = SessionId::new();

        assert!(policy.is_public("public"));
        assert!(!policy.is_public("private-xyz"));
        assert!(policy.add_member("public", a));
        assert!(!policy.add_member("public", a));
        policy.add_member("public", b);

        policy.remove_session(&a);
        assert_eq!(policy.members("public"), vec![b]);
        assert!(policy.remove_member("public", &b));
        assert!(policy.members("public").is_empty());
    }

    #[test]
    fn test_outbound_private_channel_rejected() {
        let (mut hub, transport) = hub();
        let (id, _rx) = attach(&mut hub);

        let err = hub
            .relay_outbound("private-xyz", json!("hi"), Map::new(), id)
            .unwrap_err();

        assert_eq!(err.code(), "policy-violation");
        assert!(transport.published().is_empty());
        assert!(hub.archive.is_empty());
    }

    #[test]
    fn test_outbound_publishes_and_archives() {
        let (mut hub, transport) = hub();
        let (id, _rx) = attach(&mut hub);

        let msg_id = hub
            .relay_outbound("agent-marketplace", json!({"text": "hi"}), Map::new(), id)
            .unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, derive_channel_key("agent-marketplace").to_topic());
        assert_eq!(published[0].1["kind"], "message");
        assert_eq!(published[0].1["metadata"]["origin"], "local");
        assert_eq!(published[0].1["from"], id.origin());

        let record = hub.archive.latest().unwrap();
        assert_eq!(record.id, msg_id);
        assert_eq!(record.channel, "agent-marketplace");
        assert_eq!(hub.activity.counters().messages_sent, 1);
    }

    #[test]
    fn test_inbound_only_reaches_public_members() {
        let (mut hub, _) = hub();
        let public_key = hub
            .join_channel("agent-marketplace", JoinMode::default())
            .unwrap()
            .key();
        let private_key = hub.join_channel("private-xyz", JoinMode::default()).unwrap().key();
        let (member, mut member_rx) = attach(&mut hub);
        hub.relay.add_member("agent-marketplace", member);
        hub.relay.add_member("private-xyz", member);

        let frame = |text: &str| {
            PeerFrame::Message(ChatFrame {
                from: Some("remote-bot".into()),
                content: json!(text),
                metadata: Map::new(),
            })
            .to_bytes()
            .unwrap()
        };
        let peer = Some(PeerKey::new("12D3KooWRemote"));
        hub.on_peer_message(peer.clone(), &private_key.to_topic(), &frame("secret"));
        hub.on_peer_message(peer, &public_key.to_topic(), &frame("hello"));

        let frames = drain(&mut member_rx);
        let relayed: Vec<&Value> = frames
            .iter()
            .filter(|f| f.get("channel").is_some())
            .collect();
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0]["channel"], "agent-marketplace");
        assert_eq!(relayed[0]["from"], "remote-bot");
        assert_eq!(relayed[0]["message"], "hello");
    }
}
