//! Local-client request handling.
//!
//! A session speaks one of two protocols, chosen by its first recognisable
//! message and fixed afterwards: the relay protocol (`action` field, flat
//! JSON replies) or the command protocol (`type` field, envelope replies).
//! When an auth token is configured, everything except the auth request
//! itself is refused until the session has presented it.

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use meshgate_registry::{AgentSighting, MessageQuery, Registration};
use meshgate_shared::commands::{ClientProtocol, CommandRequest, RelayRequest};
use meshgate_shared::crypto::tokens_match;
use meshgate_shared::protocol::{AgentAnnounce, Envelope, PeerFrame};
use meshgate_shared::{AgentId, JoinMode, RelayError};

use crate::fanout::SessionId;
use crate::hub::Hub;

impl Hub {
    /// Register a new local-client connection. Without a configured token
    /// the session starts authenticated.
    pub fn open_session(&mut self, outbox: mpsc::Sender<String>) -> SessionId {
        let id = SessionId::new();
        let authenticated = self.auth_token.is_none();
        self.sessions.open(id, outbox, authenticated, Utc::now());
        id
    }

    pub fn close_session(&mut self, id: &SessionId) {
        self.relay.remove_session(id);
        if let Some(session) = self.sessions.close(id) {
            // Agents announced through this session stay, but go offline.
            self.agents.touch_origin(&id.origin(), Utc::now());
            debug!(
                session = %id,
                channels = session.channels.len(),
                "Session removed"
            );
        }
    }

    /// Handle one text frame from a local client. Replies are queued on
    /// the session's outbox.
    pub fn handle_client_text(&mut self, id: &SessionId, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(session = %id, error = %e, "Ignoring unparseable client message");
                return;
            }
        };

        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let protocol = match session.protocol {
            Some(p) => p,
            None => match ClientProtocol::detect(&value) {
                Some(p) => {
                    session.protocol = Some(p);
                    debug!(session = %id, protocol = ?p, "Session protocol detected");
                    p
                }
                None => {
                    debug!(session = %id, "Ignoring message with neither action nor type");
                    return;
                }
            },
        };

        match protocol {
            ClientProtocol::Relay => self.handle_relay(id, value),
            ClientProtocol::Command => self.handle_command(id, value),
        }
    }

    fn is_authenticated(&self, id: &SessionId) -> bool {
        self.sessions.get(id).is_some_and(|s| s.authenticated)
    }

    fn authenticate(&mut self, id: &SessionId, token: &str) -> Result<(), RelayError> {
        if let Some(ref expected) = self.auth_token {
            if !tokens_match(token, expected) {
                info!(session = %id, "Rejected client authentication");
                return Err(RelayError::Unauthorized);
            }
        }
        if let Some(session) = self.sessions.get_mut(id) {
            session.authenticated = true;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Relay protocol
    // -----------------------------------------------------------------------

    fn handle_relay(&mut self, id: &SessionId, value: Value) {
        let reply = match RelayRequest::from_value(value) {
            Ok(request) if !request.is_auth() && !self.is_authenticated(id) => {
                Err(RelayError::Unauthorized)
            }
            Ok(request) => self.dispatch_relay(id, request),
            Err(RelayError::Malformed(e)) => {
                debug!(session = %id, error = %e, "Ignoring malformed relay request");
                return;
            }
            Err(e) => Err(e),
        };

        let reply = reply.unwrap_or_else(|e| {
            json!({ "type": "error", "error": e.to_string(), "code": e.code() })
        });
        self.sessions.deliver(id, reply.to_string());
    }

    fn dispatch_relay(
        &mut self,
        id: &SessionId,
        request: RelayRequest,
    ) -> Result<Value, RelayError> {
        match request {
            RelayRequest::Auth { token, agent_id } => {
                self.authenticate(id, &token)?;
                let agent_id = agent_id.filter(|a| !a.is_empty()).map(AgentId::new);
                if let Some(session) = self.sessions.get_mut(id) {
                    if agent_id.is_some() {
                        session.agent_id = agent_id.clone();
                    }
                }
                Ok(json!({ "type": "auth-ok", "agentId": agent_id }))
            }
            RelayRequest::Join { channel } => {
                if !self.relay.is_public(&channel) {
                    return Err(RelayError::PolicyViolation(channel));
                }
                let key = self.join_channel(&channel, JoinMode::default())?.key();
                self.relay.add_member(&channel, *id);
                if let Some(session) = self.sessions.get_mut(id) {
                    session.channels.insert(channel.clone());
                }
                Ok(json!({ "type": "joined", "channel": channel, "key": key }))
            }
            RelayRequest::Leave { channel } => {
                let was_member = self.relay.remove_member(&channel, id);
                if let Some(session) = self.sessions.get_mut(id) {
                    session.channels.remove(&channel);
                }
                Ok(json!({ "type": "left", "channel": channel, "wasMember": was_member }))
            }
            RelayRequest::Send {
                channel,
                message,
                metadata,
            } => {
                if !self.relay.is_public(&channel) {
                    return Err(RelayError::PolicyViolation(channel));
                }
                if !self.relay.members(&channel).contains(id) {
                    return Err(RelayError::NotJoined(channel));
                }
                let message_id = self.relay_outbound(&channel, message, metadata, *id)?;
                Ok(json!({ "type": "sent", "channel": channel, "id": message_id }))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Command protocol
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, id: &SessionId, value: Value) {
        let envelope = match CommandRequest::from_value(value) {
            Ok(request) if !request.is_auth() && !self.is_authenticated(id) => {
                error_envelope(&RelayError::Unauthorized)
            }
            Ok(request) => match self.dispatch_command(id, request) {
                Ok((kind, payload)) => Envelope::new(kind, payload),
                Err(e) => error_envelope(&e),
            },
            Err(RelayError::Malformed(e)) => {
                debug!(session = %id, error = %e, "Ignoring malformed command");
                return;
            }
            Err(e) => error_envelope(&e),
        };
        self.sessions.deliver(id, envelope.to_text());
    }

    /// Run one command, returning the reply type and payload.
    fn dispatch_command(
        &mut self,
        id: &SessionId,
        request: CommandRequest,
    ) -> Result<(String, Value), RelayError> {
        let result_kind = format!("{}-result", request.name());
        let payload = match request {
            CommandRequest::Auth { token } => {
                self.authenticate(id, &token)?;
                return Ok(("auth-ok".into(), json!({ "authenticated": true })));
            }
            CommandRequest::Ping => {
                return Ok(("pong".into(), json!({ "timestamp": Utc::now() })));
            }
            CommandRequest::Join { channel, mode } => {
                let key = self.join_channel(&channel, mode)?.key();
                if let Some(session) = self.sessions.get_mut(id) {
                    session.channels.insert(channel.clone());
                }
                return Ok(("joined".into(), json!({ "channel": channel, "key": key })));
            }
            CommandRequest::Leave { channel } => {
                let was_member = self.leave_channel(&channel);
                return Ok((
                    "left".into(),
                    json!({ "channel": channel, "wasMember": was_member }),
                ));
            }
            CommandRequest::Announce(announce) => {
                let agent_id = self.announce_local(id, announce);
                return Ok(("announced".into(), json!({ "id": agent_id })));
            }
            CommandRequest::ListPeers => to_json(&self.peers.list()),
            CommandRequest::ListAgents => to_json(&self.agent_views()),
            CommandRequest::GetAgent { id: agent } => to_json(&self.agent_view(&agent)?),
            CommandRequest::ListChannels => to_json(&self.topics.list()),
            CommandRequest::GetChannel { key } => to_json(&self.channel_detail(&key)?),
            CommandRequest::ListMessages {
                channel,
                sender,
                limit,
                offset,
            } => {
                let defaults = MessageQuery::default();
                to_json(&self.archive.query(&MessageQuery {
                    channel,
                    sender,
                    limit: limit.unwrap_or(defaults.limit),
                    offset: offset.unwrap_or(defaults.offset),
                }))
            }
            CommandRequest::GetActivity => to_json(&self.activity_view()),
            CommandRequest::GetGraph => to_json(&self.graph()),
            CommandRequest::GetStats => to_json(&self.stats()),
            CommandRequest::GetInfo => to_json(&self.info()),
            CommandRequest::ListClients => to_json(&self.sessions.list()),
        };
        Ok((result_kind, payload))
    }

    /// Register the agent a local session speaks for and tell the joined
    /// public channels about it. Private channels never see local metadata.
    fn announce_local(&mut self, id: &SessionId, announce: AgentAnnounce) -> AgentId {
        let now = Utc::now();
        let mut sighting = AgentSighting::from_announce(&announce, id.origin());
        let channels: Vec<String> = self
            .topics
            .names()
            .into_iter()
            .filter(|name| self.relay.is_public(name))
            .collect();
        for name in &channels {
            sighting = sighting.on_channel(name.clone());
        }

        let (agent_id, registration) = self.agents.register(sighting, now);
        if let Some(session) = self.sessions.get_mut(id) {
            session.agent_id = Some(agent_id.clone());
        }
        if registration == Registration::Created {
            self.agent_discovered(&agent_id, now);
        }

        let frame = PeerFrame::Announce(AgentAnnounce {
            id: Some(agent_id.to_string()),
            ..announce
        });
        match frame.to_bytes() {
            Ok(data) => {
                for name in &channels {
                    if let Err(e) = self.publish(name, data.clone()) {
                        debug!(channel = %name, error = %e, "Failed to publish announce");
                    }
                }
            }
            Err(e) => debug!(error = %e, "Failed to encode announce"),
        }

        info!(session = %id, agent = %agent_id, "Local agent announced");
        agent_id
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn error_envelope(e: &RelayError) -> Envelope {
    Envelope::new("error", json!({ "error": e.to_string(), "code": e.code() }))
}
