//! The relay engine.
//!
//! [`Hub`] owns every table (topics, peers, agents, archive, activity,
//! sessions) and is the only thing that mutates them. It is shared as
//! `Arc<tokio::sync::Mutex<Hub>>`, so one caller at a time runs a handler
//! to completion. Handlers never await: effects leave the hub through
//! non-blocking queues (the [`Transport`] seam towards the swarm, and
//! per-session outboxes towards local clients).
//!
//! Client command handling lives in `session.rs`, the relay policy in
//! `relay.rs` and read-only views in `query.rs`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use meshgate_net::SwarmCommand;
use meshgate_registry::{
    ActivityEvent, ActivityTracker, Agent, AgentRegistry, AgentSighting, JoinOutcome,
    MessageArchive, MessageKind, MessageRecord, PeerTable, Registration, TopicTable,
};
use meshgate_shared::commands::ClientProtocol;
use meshgate_shared::constants::ACTIVITY_RETENTION_HOURS;
use meshgate_shared::protocol::{decode_peer_frame, DecodedFrame, Envelope, EventKind};
use meshgate_shared::{ChannelOrigin, JoinMode, PeerKey, RelayError};

use crate::config::ServerConfig;
use crate::fanout::{SessionId, SessionTable};
use crate::relay::RelayPolicy;

/// Outbound seam towards the peer-to-peer substrate.
///
/// Implementations must not block: the hub calls them while holding its
/// lock.
pub trait Transport: Send {
    fn join(&self, topic: &str, mode: JoinMode) -> Result<(), RelayError>;
    fn leave(&self, topic: &str) -> Result<(), RelayError>;
    fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), RelayError>;
}

impl Transport for mpsc::Sender<SwarmCommand> {
    fn join(&self, topic: &str, mode: JoinMode) -> Result<(), RelayError> {
        send_command(
            self,
            SwarmCommand::Join {
                topic: topic.to_string(),
                announce: mode.announce,
                discover: mode.discover,
            },
        )
    }

    fn leave(&self, topic: &str) -> Result<(), RelayError> {
        send_command(
            self,
            SwarmCommand::Leave {
                topic: topic.to_string(),
            },
        )
    }

    fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), RelayError> {
        send_command(
            self,
            SwarmCommand::Publish {
                topic: topic.to_string(),
                data,
            },
        )
    }
}

fn send_command(tx: &mpsc::Sender<SwarmCommand>, cmd: SwarmCommand) -> Result<(), RelayError> {
    tx.try_send(cmd).map_err(|e| match e {
        TrySendError::Full(_) => RelayError::Transport("swarm command queue full".into()),
        TrySendError::Closed(_) => RelayError::Transport("swarm task stopped".into()),
    })
}

/// The hub as shared between the swarm bridge, sockets and HTTP handlers.
pub type SharedHub = Arc<Mutex<Hub>>;

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub agents: usize,
    pub buckets: usize,
}

pub struct Hub {
    pub(crate) topics: TopicTable,
    pub(crate) peers: PeerTable,
    pub(crate) agents: AgentRegistry,
    pub(crate) archive: MessageArchive,
    pub(crate) activity: ActivityTracker,
    pub(crate) sessions: SessionTable,
    pub(crate) relay: RelayPolicy,
    pub(crate) auth_token: Option<String>,
    pub(crate) instance_name: String,
    pub(crate) local_peer: PeerKey,
    pub(crate) session_buffer: usize,
    transport: Box<dyn Transport>,
}

impl Hub {
    pub fn new(config: &ServerConfig, local_peer: PeerKey, transport: Box<dyn Transport>) -> Self {
        Self {
            topics: TopicTable::new(),
            peers: PeerTable::new(),
            agents: AgentRegistry::new(),
            archive: MessageArchive::new(config.archive_capacity),
            activity: ActivityTracker::new(Utc::now()),
            sessions: SessionTable::new(),
            relay: RelayPolicy::new(config.public_channels.iter().cloned()),
            auth_token: config.auth_token.clone(),
            instance_name: config.instance_name.clone(),
            local_peer,
            session_buffer: config.session_buffer,
            transport,
        }
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    /// Join a channel on the substrate. Joining an already joined name
    /// returns the existing key and does nothing else.
    pub fn join_channel(&mut self, name: &str, mode: JoinMode) -> Result<JoinOutcome, RelayError> {
        let outcome = self.topics.lookup(name);
        if !outcome.is_new() {
            return Ok(outcome);
        }

        let key = outcome.key();
        self.transport.join(&key.to_topic(), mode)?;

        let now = Utc::now();
        let outcome = self.topics.join(name, mode, now);
        self.activity
            .record(ActivityEvent::ChannelDiscovered { at: now, channel: name });
        info!(channel = %name, key = %key.short(), "Joined channel");

        self.emit(
            EventKind::ChannelJoined,
            json!({
                "name": name,
                "key": key,
                "announce": mode.announce,
                "discover": mode.discover,
            }),
        );
        Ok(outcome)
    }

    /// Leave a joined channel. `false` if the name was not joined.
    pub fn leave_channel(&mut self, name: &str) -> bool {
        let Some(key) = self.topics.key_of(name) else {
            return false;
        };

        // The entry goes regardless; a lost leave only delays the unsubscribe.
        if let Err(e) = self.transport.leave(&key.to_topic()) {
            warn!(channel = %name, error = %e, "Failed to release channel subscription");
        }

        self.topics.leave(name);
        self.peers.forget_channel(&key);
        self.relay.forget_channel(name);
        self.sessions.forget_channel(name);
        info!(channel = %name, key = %key.short(), "Left channel");

        self.emit(EventKind::ChannelLeft, json!({ "name": name, "key": key }));
        true
    }

    /// Publish raw bytes on a joined channel.
    pub(crate) fn publish(&self, name: &str, data: Vec<u8>) -> Result<(), RelayError> {
        let key = self
            .topics
            .key_of(name)
            .ok_or_else(|| RelayError::NotJoined(name.to_string()))?;
        self.transport.publish(&key.to_topic(), data)
    }

    // -----------------------------------------------------------------------
    // Peer events
    // -----------------------------------------------------------------------

    pub fn on_peer_connected(&mut self, peer: PeerKey, address: String, initiator: bool) {
        let now = Utc::now();
        self.peers
            .on_connected(peer.clone(), address.clone(), initiator, now);

        let (agent_id, registration) = self
            .agents
            .register(AgentSighting::from_origin(peer.as_str()), now);

        self.emit(
            EventKind::AgentJoin,
            json!({ "peer": peer, "address": address, "initiator": initiator, "agent": agent_id }),
        );

        if registration == Registration::Created {
            self.agent_discovered(&agent_id, now);
        }
    }

    pub fn on_peer_disconnected(&mut self, peer: &PeerKey) {
        let Some(record) = self.peers.on_disconnected(peer) else {
            debug!(peer = %peer, "Disconnect for untracked peer");
            return;
        };

        let now = Utc::now();
        for key in &record.channels {
            self.topics.record_peer_leave(key, peer, now);
        }
        // Agents outlive the connection; only their last-seen moves.
        self.agents.touch_origin(peer.as_str(), now);
        let agents = self.agents.with_origin(peer.as_str());

        self.emit(EventKind::AgentLeave, json!({ "peer": peer, "agents": agents }));
    }

    pub fn on_peer_subscribed(&mut self, peer: &PeerKey, topic: &str) {
        match self.topics.resolve(topic) {
            ChannelOrigin::Known { name, key } => {
                let now = Utc::now();
                self.topics.record_peer_join(&key, peer, now);
                self.peers.add_channel(peer, key);
                self.agents.add_channel_for_origin(peer.as_str(), &name);
                debug!(peer = %peer, channel = %name, "Peer joined channel");
            }
            ChannelOrigin::Unknown { .. } => {
                debug!(
                    peer = %peer,
                    topic = %topic,
                    "Peer subscribed to a topic we have not joined"
                );
            }
        }
    }

    pub fn on_peer_unsubscribed(&mut self, peer: &PeerKey, topic: &str) {
        if let ChannelOrigin::Known { name, key } = self.topics.resolve(topic) {
            self.topics.record_peer_leave(&key, peer, Utc::now());
            self.peers.remove_channel(peer, &key);
            debug!(peer = %peer, channel = %name, "Peer left channel");
        }
    }

    /// Bytes received from a peer on `topic`.
    pub fn on_peer_message(&mut self, source: Option<PeerKey>, topic: &str, data: &[u8]) {
        let now = Utc::now();
        if let Some(ref peer) = source {
            self.peers.touch(peer, now);
        }

        let origin = self.topics.resolve(topic);
        let channel = origin.label();
        let sender = source
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let (record, relay_from) = match decode_peer_frame(data) {
            DecodedFrame::Announce(announce) => {
                let mut sighting = AgentSighting::from_announce(&announce, sender.clone());
                if let Some(name) = origin.name() {
                    sighting = sighting.on_channel(name);
                }
                let (agent_id, registration) = self.agents.register(sighting, now);
                if registration == Registration::Created {
                    self.agent_discovered(&agent_id, now);
                }
                let content = serde_json::to_value(&announce).unwrap_or(Value::Null);
                (
                    MessageRecord::new(&channel, &sender, content, MessageKind::Announce),
                    None,
                )
            }
            DecodedFrame::Message(frame) => {
                let from = frame.from.clone().unwrap_or_else(|| sender.clone());
                let record =
                    MessageRecord::new(&channel, &sender, frame.content, MessageKind::Message)
                        .with_metadata(frame.metadata);
                (record, Some(from))
            }
            DecodedFrame::Raw(value) => (
                MessageRecord::new(&channel, &sender, value, MessageKind::Raw),
                Some(sender.clone()),
            ),
        };

        if let Some(name) = origin.name() {
            self.topics.record_message(name, record.timestamp);
        }
        self.activity.record(ActivityEvent::MessageReceived {
            at: record.timestamp,
            sender: &sender,
            channel: &channel,
        });

        self.emit(
            EventKind::Message,
            serde_json::to_value(&record).unwrap_or(Value::Null),
        );

        match (&origin, relay_from) {
            (ChannelOrigin::Known { name, .. }, Some(from)) => {
                self.relay_inbound(name, &record, &from);
            }
            (ChannelOrigin::Unknown { topic }, _) => {
                debug!(topic = %topic, "Message on unknown topic archived without relay");
            }
            _ => {}
        }

        self.archive.archive(record);
    }

    pub(crate) fn agent_discovered(
        &mut self,
        agent_id: &meshgate_shared::AgentId,
        at: DateTime<Utc>,
    ) {
        self.activity.record(ActivityEvent::AgentDiscovered {
            at,
            agent: agent_id.as_str(),
        });
        let payload = self
            .agents
            .get(agent_id)
            .and_then(|a| serde_json::to_value(a).ok())
            .unwrap_or_else(|| json!({ "id": agent_id }));
        self.emit(EventKind::AgentDiscovered, payload);
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Send an event envelope to every authenticated session. Relay-protocol
    /// sessions get message traffic through the relay path instead.
    pub(crate) fn emit(&self, kind: EventKind, payload: Value) -> usize {
        let envelope = Envelope::event(kind, payload);
        let is_message = kind == EventKind::Message;
        self.sessions.broadcast(&envelope, |s| {
            s.authenticated && !(is_message && s.protocol == Some(ClientProtocol::Relay))
        })
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    /// Evict agents unseen for `agent_ttl` (online agents are kept) and
    /// activity buckets past the retention window.
    pub fn sweep(&mut self, now: DateTime<Utc>, agent_ttl: Duration) -> SweepReport {
        let peers = &self.peers;
        let sessions = &self.sessions;
        let evicted = self
            .agents
            .evict_older_than(now - agent_ttl, |agent| agent_online(agent, peers, sessions));

        let buckets = self
            .activity
            .evict_buckets_before(now - Duration::hours(ACTIVITY_RETENTION_HOURS));

        if !evicted.is_empty() || buckets > 0 {
            info!(agents = evicted.len(), buckets, "Sweep evicted stale records");
        }
        SweepReport {
            agents: evicted.len(),
            buckets,
        }
    }
}

/// An agent is online while the peer or local session it came through is
/// still connected.
pub(crate) fn agent_online(agent: &Agent, peers: &PeerTable, sessions: &SessionTable) -> bool {
    match SessionId::from_origin(&agent.origin) {
        Some(session) => sessions.contains(&session),
        None => peers.is_connected(&PeerKey::new(agent.origin.clone())),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum TransportCall {
        Join { topic: String, mode: JoinMode },
        Leave { topic: String },
        Publish { topic: String, data: Vec<u8> },
    }

    /// Transport that records every call instead of touching the network.
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        pub calls: Arc<Mutex<Vec<TransportCall>>>,
    }

    impl RecordingTransport {
        pub fn calls(&self) -> Vec<TransportCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn published(&self) -> Vec<(String, Value)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    TransportCall::Publish { topic, data } => {
                        Some((topic, serde_json::from_slice(&data).unwrap()))
                    }
                    _ => None,
                })
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn join(&self, topic: &str, mode: JoinMode) -> Result<(), RelayError> {
            self.calls.lock().unwrap().push(TransportCall::Join {
                topic: topic.to_string(),
                mode,
            });
            Ok(())
        }

        fn leave(&self, topic: &str) -> Result<(), RelayError> {
            self.calls.lock().unwrap().push(TransportCall::Leave {
                topic: topic.to_string(),
            });
            Ok(())
        }

        fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), RelayError> {
            self.calls.lock().unwrap().push(TransportCall::Publish {
                topic: topic.to_string(),
                data,
            });
            Ok(())
        }
    }

    pub fn hub_with(config: ServerConfig) -> (Hub, RecordingTransport) {
        let transport = RecordingTransport::default();
        let hub = Hub::new(
            &config,
            PeerKey::new("12D3KooWSelf"),
            Box::new(transport.clone()),
        );
        (hub, transport)
    }

    pub fn hub() -> (Hub, RecordingTransport) {
        hub_with(ServerConfig::default())
    }

    /// Open a session and return its id and the receiving end of its queue.
    pub fn attach(hub: &mut Hub) -> (SessionId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let id = hub.open_session(tx);
        (id, rx)
    }

    /// Everything queued for a session so far, parsed.
    pub fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    pub fn types(frames: &[Value]) -> Vec<String> {
        frames
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}
