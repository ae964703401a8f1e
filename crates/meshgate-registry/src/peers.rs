//! Peer connection tracking.
//!
//! Maintains an in-memory map of live transport-level peers, where they
//! connected from, which side initiated the connection, and which joined
//! channels they are present on. Entries exist only while the peer is
//! connected.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use meshgate_shared::{ChannelKey, PeerKey};

use crate::error::{RegistryError, Result};

/// Information about a connected peer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    /// The peer's public key.
    pub peer: PeerKey,
    /// Remote address of the connection.
    pub address: String,
    /// When the connection was established.
    pub connected_at: DateTime<Utc>,
    /// Last time anything was received from this peer.
    pub last_seen: DateTime<Utc>,
    /// We dialed the peer.
    pub is_initiator: bool,
    /// The peer dialed us.
    pub is_responder: bool,
    /// Joined channels the peer is present on.
    pub channels: BTreeSet<ChannelKey>,
}

/// Tracks all currently connected peers.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerKey, PeerRecord>,
}

impl PeerTable {
    /// Create a new, empty peer table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly connected peer, or refresh an existing entry.
    ///
    /// # Arguments
    ///
    /// * `peer` - The remote peer's key
    /// * `address` - Remote address of the connection
    /// * `initiator` - Whether we dialed the peer
    ///
    /// Returns `true` if the peer was not already tracked.
    pub fn on_connected(
        &mut self,
        peer: PeerKey,
        address: String,
        initiator: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(existing) = self.peers.get_mut(&peer) {
            existing.address = address;
            existing.last_seen = now;
            existing.is_initiator |= initiator;
            existing.is_responder |= !initiator;
            debug!(peer = %peer, "Refreshed peer connection");
            return false;
        }

        debug!(
            peer = %peer,
            addr = %address,
            initiator,
            "Tracking new peer connection"
        );

        self.peers.insert(
            peer.clone(),
            PeerRecord {
                peer,
                address,
                connected_at: now,
                last_seen: now,
                is_initiator: initiator,
                is_responder: !initiator,
                channels: BTreeSet::new(),
            },
        );
        true
    }

    /// Remove a peer that has fully disconnected, returning its last state.
    pub fn on_disconnected(&mut self, peer: &PeerKey) -> Option<PeerRecord> {
        let removed = self.peers.remove(peer);
        if removed.is_some() {
            debug!(peer = %peer, "Removed peer from table");
        }
        removed
    }

    /// Mark traffic from a peer.
    pub fn touch(&mut self, peer: &PeerKey, now: DateTime<Utc>) -> bool {
        match self.peers.get_mut(peer) {
            Some(record) => {
                record.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn add_channel(&mut self, peer: &PeerKey, key: ChannelKey) -> bool {
        self.peers
            .get_mut(peer)
            .map(|record| record.channels.insert(key))
            .unwrap_or(false)
    }

    pub fn remove_channel(&mut self, peer: &PeerKey, key: &ChannelKey) -> bool {
        self.peers
            .get_mut(peer)
            .map(|record| record.channels.remove(key))
            .unwrap_or(false)
    }

    /// Drop a channel from every peer's membership set (after leaving it).
    pub fn forget_channel(&mut self, key: &ChannelKey) {
        for record in self.peers.values_mut() {
            record.channels.remove(key);
        }
    }

    /// Get connection info for a specific peer.
    pub fn get(&self, peer: &PeerKey) -> Option<&PeerRecord> {
        self.peers.get(peer)
    }

    pub fn find(&self, peer: &str) -> Result<&PeerRecord> {
        self.peers
            .get(&PeerKey::new(peer))
            .ok_or_else(|| RegistryError::PeerNotFound(peer.to_string()))
    }

    /// Check whether a peer is currently connected.
    pub fn is_connected(&self, peer: &PeerKey) -> bool {
        self.peers.contains_key(peer)
    }

    /// Snapshot of all live peers, oldest connection first.
    pub fn list(&self) -> Vec<PeerRecord> {
        let mut rows: Vec<PeerRecord> = self.peers.values().cloned().collect();
        rows.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then_with(|| a.peer.cmp(&b.peer)));
        rows
    }

    pub fn keys(&self) -> impl Iterator<Item = &PeerKey> {
        self.peers.keys()
    }

    /// Return the number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
