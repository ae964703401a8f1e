//! Topic membership table.
//!
//! Tracks the channels this node has joined, the role flags each was
//! joined with, and which peers are currently present on it.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use meshgate_shared::crypto::derive_channel_key;
use meshgate_shared::{ChannelKey, ChannelOrigin, JoinMode, PeerKey};

use crate::error::{RegistryError, Result};

/// A joined channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub name: String,
    pub key: ChannelKey,
    pub announce: bool,
    pub discover: bool,
    pub created_at: DateTime<Utc>,
    pub message_count: u64,
    pub last_activity: DateTime<Utc>,
    pub members: BTreeSet<PeerKey>,
}

impl Channel {
    pub fn peer_count(&self) -> usize {
        self.members.len()
    }
}

/// Listing row for a channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub name: String,
    pub key: ChannelKey,
    pub announce: bool,
    pub discover: bool,
    pub peer_count: usize,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl From<&Channel> for ChannelSummary {
    fn from(c: &Channel) -> Self {
        Self {
            name: c.name.clone(),
            key: c.key,
            announce: c.announce,
            discover: c.discover,
            peer_count: c.peer_count(),
            message_count: c.message_count,
            created_at: c.created_at,
            last_activity: c.last_activity,
        }
    }
}

/// Outcome of [`TopicTable::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Channel was already joined; nothing changed.
    Existing(ChannelKey),
    /// Channel entry was created.
    Joined(ChannelKey),
}

impl JoinOutcome {
    pub fn key(&self) -> ChannelKey {
        match self {
            JoinOutcome::Existing(k) | JoinOutcome::Joined(k) => *k,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, JoinOutcome::Joined(_))
    }
}

#[derive(Debug, Default)]
pub struct TopicTable {
    by_name: HashMap<String, ChannelKey>,
    channels: HashMap<ChannelKey, Channel>,
}

impl TopicTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key a join of `name` would use, and whether it is already joined.
    pub fn lookup(&self, name: &str) -> JoinOutcome {
        match self.by_name.get(name) {
            Some(key) => JoinOutcome::Existing(*key),
            None => JoinOutcome::Joined(derive_channel_key(name)),
        }
    }

    /// Record a channel entry. Re-joining a joined name is a no-op that
    /// returns the existing key.
    pub fn join(&mut self, name: &str, mode: JoinMode, now: DateTime<Utc>) -> JoinOutcome {
        if let Some(key) = self.by_name.get(name) {
            return JoinOutcome::Existing(*key);
        }

        let key = derive_channel_key(name);
        self.by_name.insert(name.to_string(), key);
        self.channels.insert(
            key,
            Channel {
                name: name.to_string(),
                key,
                announce: mode.announce,
                discover: mode.discover,
                created_at: now,
                message_count: 0,
                last_activity: now,
                members: BTreeSet::new(),
            },
        );
        debug!(channel = %name, key = %key.short(), "Recorded joined channel");
        JoinOutcome::Joined(key)
    }

    /// Remove a channel entry. `None` if the name was not joined.
    pub fn leave(&mut self, name: &str) -> Option<Channel> {
        let key = self.by_name.remove(name)?;
        self.channels.remove(&key)
    }

    pub fn key_of(&self, name: &str) -> Option<ChannelKey> {
        self.by_name.get(name).copied()
    }

    pub fn is_joined(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn get(&self, key: &ChannelKey) -> Option<&Channel> {
        self.channels.get(key)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Channel> {
        self.key_of(name).and_then(|k| self.channels.get(&k))
    }

    /// Look up a channel by its hex key.
    pub fn find(&self, key_hex: &str) -> Result<&Channel> {
        ChannelKey::from_hex(key_hex)
            .ok()
            .and_then(|k| self.channels.get(&k))
            .ok_or_else(|| RegistryError::ChannelNotFound(key_hex.to_string()))
    }

    /// Map a transport topic back to the channel it carries.
    pub fn resolve(&self, topic: &str) -> ChannelOrigin {
        match ChannelKey::from_hex(topic)
            .ok()
            .and_then(|k| self.channels.get(&k))
        {
            Some(channel) => ChannelOrigin::Known {
                name: channel.name.clone(),
                key: channel.key,
            },
            None => ChannelOrigin::Unknown {
                topic: topic.to_string(),
            },
        }
    }

    /// Returns `true` if the peer was not already a member.
    pub fn record_peer_join(
        &mut self,
        key: &ChannelKey,
        peer: &PeerKey,
        now: DateTime<Utc>,
    ) -> bool {
        match self.channels.get_mut(key) {
            Some(channel) => {
                channel.last_activity = now;
                channel.members.insert(peer.clone())
            }
            None => false,
        }
    }

    /// Returns `true` if the peer was a member.
    pub fn record_peer_leave(
        &mut self,
        key: &ChannelKey,
        peer: &PeerKey,
        now: DateTime<Utc>,
    ) -> bool {
        match self.channels.get_mut(key) {
            Some(channel) => {
                let removed = channel.members.remove(peer);
                if removed {
                    channel.last_activity = now;
                }
                removed
            }
            None => false,
        }
    }

    /// Bump the message counter and activity timestamp of a channel.
    pub fn record_message(&mut self, name: &str, at: DateTime<Utc>) -> bool {
        let Some(key) = self.by_name.get(name) else {
            return false;
        };
        match self.channels.get_mut(key) {
            Some(channel) => {
                channel.message_count += 1;
                channel.last_activity = at;
                true
            }
            None => false,
        }
    }

    /// All channels, oldest first.
    pub fn list(&self) -> Vec<ChannelSummary> {
        let mut rows: Vec<ChannelSummary> =
            self.channels.values().map(ChannelSummary::from).collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        rows
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(s: &str) -> PeerKey {
        PeerKey::new(s)
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut table = TopicTable::new();
        let first = table.join("alpha", JoinMode::default(), Utc::now());
        let second = table.join("alpha", JoinMode::default(), Utc::now());

        assert!(first.is_new());
        assert_eq!(second, JoinOutcome::Existing(first.key()));
        assert_eq!(table.len(), 1);
        assert_eq!(first.key(), derive_channel_key("alpha"));
    }

    #[test]
    fn test_lookup_does_not_record() {
        let mut table = TopicTable::new();
        assert!(table.lookup("alpha").is_new());
        assert!(table.is_empty());
        table.join("alpha", JoinMode::default(), Utc::now());
        assert!(!table.lookup("alpha").is_new());
    }

    #[test]
    fn test_leave() {
        let mut table = TopicTable::new();
        assert!(table.leave("alpha").is_none());

        table.join("alpha", JoinMode::default(), Utc::now());
        let removed = table.leave("alpha").unwrap();
        assert_eq!(removed.name, "alpha");
        assert!(!table.is_joined("alpha"));
        assert!(table.leave("alpha").is_none());
    }

    #[test]
    fn test_resolve_topic() {
        let mut table = TopicTable::new();
        let key = table.join("alpha", JoinMode::default(), Utc::now()).key();

        assert_eq!(
            table.resolve(&key.to_topic()),
            ChannelOrigin::Known {
                name: "alpha".into(),
                key
            }
        );
        let other = derive_channel_key("beta").to_topic();
        assert!(matches!(table.resolve(&other), ChannelOrigin::Unknown { .. }));
        assert!(matches!(table.resolve("not-hex"), ChannelOrigin::Unknown { .. }));
    }

    #[test]
    fn test_peer_membership() {
        let mut table = TopicTable::new();
        let key = table.join("alpha", JoinMode::default(), Utc::now()).key();

        assert!(table.record_peer_join(&key, &peer("p1"), Utc::now()));
        assert!(!table.record_peer_join(&key, &peer("p1"), Utc::now()));
        assert!(table.record_peer_join(&key, &peer("p2"), Utc::now()));
        assert_eq!(table.get(&key).unwrap().peer_count(), 2);

        assert!(table.record_peer_leave(&key, &peer("p1"), Utc::now()));
        assert!(!table.record_peer_leave(&key, &peer("p1"), Utc::now()));
        assert_eq!(table.list()[0].peer_count, 1);
    }

    #[test]
    fn test_record_message_updates_counters() {
        let mut table = TopicTable::new();
        let start = Utc::now();
        table.join("alpha", JoinMode::default(), start);
        let later = start + chrono::Duration::seconds(5);

        assert!(table.record_message("alpha", later));
        assert!(!table.record_message("beta", later));

        let channel = table.get_by_name("alpha").unwrap();
        assert_eq!(channel.message_count, 1);
        assert_eq!(channel.last_activity, later);
    }

    #[test]
    fn test_find_by_hex_key() {
        let mut table = TopicTable::new();
        let key = table.join("alpha", JoinMode::default(), Utc::now()).key();
        assert_eq!(table.find(&key.to_hex()).unwrap().name, "alpha");
        assert_eq!(
            table.find("zz").unwrap_err(),
            RegistryError::ChannelNotFound("zz".into())
        );
    }
}
