//! Local-client session table and best-effort delivery.
//!
//! Every session owns a bounded outbound queue drained by its socket
//! writer task. Delivery is at-most-once: a full or closed queue drops the
//! frame for that session only and nothing is retried or awaited.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use meshgate_shared::commands::ClientProtocol;
use meshgate_shared::protocol::Envelope;
use meshgate_shared::AgentId;

/// Identity of a local-client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Agent origin string for agents announced through this session.
    pub fn origin(&self) -> String {
        format!("session:{}", self.0)
    }

    /// Inverse of [`SessionId::origin`].
    pub fn from_origin(origin: &str) -> Option<Self> {
        origin
            .strip_prefix("session:")
            .and_then(|id| Uuid::parse_str(id).ok())
            .map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Fixed by the first recognisable message.
    pub protocol: Option<ClientProtocol>,
    pub authenticated: bool,
    /// Channel names this session joined.
    pub channels: BTreeSet<String>,
    pub agent_id: Option<AgentId>,
    pub connected_at: DateTime<Utc>,
    outbox: mpsc::Sender<String>,
}

/// Row of the live client listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    pub id: SessionId,
    pub protocol: Option<ClientProtocol>,
    pub authenticated: bool,
    pub agent_id: Option<AgentId>,
    pub channels: Vec<String>,
    pub connected_at: DateTime<Utc>,
}

impl From<&Session> for ClientSummary {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            protocol: s.protocol,
            authenticated: s.authenticated,
            agent_id: s.agent_id.clone(),
            channels: s.channels.iter().cloned().collect(),
            connected_at: s.connected_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(
        &mut self,
        id: SessionId,
        outbox: mpsc::Sender<String>,
        authenticated: bool,
        now: DateTime<Utc>,
    ) {
        debug!(session = %id, authenticated, "Session opened");
        self.sessions.insert(
            id,
            Session {
                id,
                protocol: None,
                authenticated,
                channels: BTreeSet::new(),
                agent_id: None,
                connected_at: now,
                outbox,
            },
        );
    }

    pub fn close(&mut self, id: &SessionId) -> Option<Session> {
        let removed = self.sessions.remove(id);
        if removed.is_some() {
            debug!(session = %id, "Session closed");
        }
        removed
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Queue one text frame for a session. Returns whether it was queued.
    pub fn deliver(&self, id: &SessionId, text: String) -> bool {
        match self.sessions.get(id) {
            Some(session) => try_deliver(session, text),
            None => false,
        }
    }

    /// Queue an envelope for every session accepted by `filter`.
    /// Returns how many sessions it was queued for.
    pub fn broadcast<F>(&self, envelope: &Envelope, filter: F) -> usize
    where
        F: Fn(&Session) -> bool,
    {
        let text = envelope.to_text();
        self.sessions
            .values()
            .filter(|s| filter(*s))
            .filter(|s| try_deliver(*s, text.clone()))
            .count()
    }

    /// Drop a channel name from every session's joined set.
    pub fn forget_channel(&mut self, name: &str) {
        for session in self.sessions.values_mut() {
            session.channels.remove(name);
        }
    }

    /// All sessions, oldest first.
    pub fn list(&self) -> Vec<ClientSummary> {
        let mut rows: Vec<ClientSummary> =
            self.sessions.values().map(ClientSummary::from).collect();
        rows.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then_with(|| a.id.cmp(&b.id)));
        rows
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn try_deliver(session: &Session, text: String) -> bool {
    match session.outbox.try_send(text) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!(session = %session.id, "Session queue full, frame dropped");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(session = %session.id, "Session queue closed, frame dropped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_origin_roundtrip() {
        let id = SessionId::new();
        assert_eq!(SessionId::from_origin(&id.origin()), Some(id));
        assert_eq!(SessionId::from_origin("12D3KooWabc"), None);
        assert_eq!(SessionId::from_origin("session:not-a-uuid"), None);
    }

    #[tokio::test]
    async fn test_broadcast_respects_filter() {
        let mut table = SessionTable::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = SessionId::new();
        let b = SessionId::new();
        table.open(a, tx_a, true, Utc::now());
        table.open(b, tx_b, false, Utc::now());

        let sent = table.broadcast(&Envelope::new("ping", json!({})), |s| s.authenticated);
        assert_eq!(sent, 1);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_others() {
        let mut table = SessionTable::new();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let slow = SessionId::new();
        let fast = SessionId::new();
        table.open(slow, slow_tx, true, Utc::now());
        table.open(fast, fast_tx, true, Utc::now());

        let envelope = Envelope::new("message", json!({"n": 1}));
        assert_eq!(table.broadcast(&envelope, |_| true), 2);
        // The slow queue is now full: only the fast session gets the second frame.
        assert_eq!(table.broadcast(&envelope, |_| true), 1);

        assert!(fast_rx.recv().await.is_some());
        assert!(fast_rx.recv().await.is_some());
    }

    #[test]
    fn test_closed_queue_is_not_an_error() {
        let mut table = SessionTable::new();
        let (tx, rx) = mpsc::channel(1);
        let id = SessionId::new();
        table.open(id, tx, true, Utc::now());
        drop(rx);

        assert!(!table.deliver(&id, "hello".into()));
        assert!(!table.deliver(&SessionId::new(), "hello".into()));
    }

    #[test]
    fn test_forget_channel() {
        let mut table = SessionTable::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = SessionId::new();
        table.open(id, tx, true, Utc::now());
        if let Some(s) = table.get_mut(&id) {
            s.channels.insert("alpha".into());
            s.channels.insert("beta".into());
        }

        table.forget_channel("alpha");
        assert_eq!(table.list()[0].channels, vec!["beta".to_string()]);
    }
}
