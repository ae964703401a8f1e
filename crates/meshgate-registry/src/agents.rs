//! Agent registry.
//!
//! Agents are logical identities. They outlive the peer connection that
//! revealed them: a disconnect only refreshes `last_seen`. Repeated
//! sightings of the same id merge into one record.
//!
//! Nothing is removed implicitly. [`AgentRegistry::evict_older_than`] is
//! the only removal path and the server drives it from a periodic sweep
//! when a TTL is configured.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use meshgate_shared::protocol::AgentAnnounce;
use meshgate_shared::AgentId;

use crate::error::{RegistryError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: AgentId,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub agent_type: Option<String>,
    pub capabilities: BTreeSet<String>,
    /// Public key (or local session) the agent was last heard through.
    pub origin: String,
    /// Channel names the agent has been seen on.
    pub channels: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

/// One observation of an agent. Absent fields leave the record alone.
#[derive(Debug, Clone, Default)]
pub struct AgentSighting {
    /// Explicit id; falls back to `origin` when absent.
    pub id: Option<AgentId>,
    pub origin: String,
    pub name: Option<String>,
    pub agent_type: Option<String>,
    pub capabilities: Vec<String>,
    pub channels: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl AgentSighting {
    /// A bare sighting keyed by its origin (e.g. on peer connect).
    pub fn from_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Default::default()
        }
    }

    pub fn from_announce(announce: &AgentAnnounce, origin: impl Into<String>) -> Self {
        Self {
            id: announce
                .id
                .as_ref()
                .filter(|id| !id.is_empty())
                .map(|id| AgentId::new(id.clone())),
            origin: origin.into(),
            name: announce.name.clone(),
            agent_type: announce.agent_type.clone(),
            capabilities: announce.capabilities.clone(),
            channels: Vec::new(),
            metadata: announce.metadata.clone(),
        }
    }

    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }

    /// Id this sighting resolves to.
    pub fn resolved_id(&self) -> AgentId {
        self.id
            .clone()
            .unwrap_or_else(|| AgentId::new(self.origin.clone()))
    }
}

/// Whether a registration created a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    Merged,
}

#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge an agent.
    ///
    /// Scalars are last-write-wins, capabilities and channels are unioned,
    /// metadata is shallow-merged, and `last_seen` strictly increases.
    pub fn register(
        &mut self,
        sighting: AgentSighting,
        now: DateTime<Utc>,
    ) -> (AgentId, Registration) {
        let id = sighting.resolved_id();

        if let Some(agent) = self.agents.get_mut(&id) {
            if sighting.name.is_some() {
                agent.name = sighting.name;
            }
            if sighting.agent_type.is_some() {
                agent.agent_type = sighting.agent_type;
            }
            agent.origin = sighting.origin;
            agent.capabilities.extend(sighting.capabilities);
            agent.channels.extend(sighting.channels);
            agent.metadata.extend(sighting.metadata);
            agent.last_seen = advance(agent.last_seen, now);
            debug!(agent = %id, "Merged agent sighting");
            return (id, Registration::Merged);
        }

        debug!(agent = %id, origin = %sighting.origin, "Registered new agent");
        self.agents.insert(
            id.clone(),
            Agent {
                id: id.clone(),
                name: sighting.name,
                agent_type: sighting.agent_type,
                capabilities: sighting.capabilities.into_iter().collect(),
                origin: sighting.origin,
                channels: sighting.channels.into_iter().collect(),
                first_seen: now,
                last_seen: now,
                metadata: sighting.metadata,
            },
        );
        (id, Registration::Created)
    }

    /// Refresh `last_seen` of every agent heard through `origin`.
    pub fn touch_origin(&mut self, origin: &str, now: DateTime<Utc>) -> usize {
        let mut touched = 0;
        for agent in self.agents.values_mut().filter(|a| a.origin == origin) {
            agent.last_seen = advance(agent.last_seen, now);
            touched += 1;
        }
        touched
    }

    /// Add a channel to every agent heard through `origin`.
    pub fn add_channel_for_origin(&mut self, origin: &str, channel: &str) -> usize {
        let mut updated = 0;
        for agent in self.agents.values_mut().filter(|a| a.origin == origin) {
            if agent.channels.insert(channel.to_string()) {
                updated += 1;
            }
        }
        updated
    }

    pub fn with_origin(&self, origin: &str) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .agents
            .values()
            .filter(|a| a.origin == origin)
            .map(|a| a.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn find(&self, id: &str) -> Result<&Agent> {
        self.agents
            .get(&AgentId::new(id))
            .ok_or_else(|| RegistryError::AgentNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    /// Every agent ever seen (and not evicted), oldest first.
    pub fn list(&self) -> Vec<Agent> {
        let mut rows: Vec<Agent> = self.agents.values().cloned().collect();
        rows.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then_with(|| a.id.cmp(&b.id)));
        rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Remove agents last seen before `cutoff`, except those `keep` holds on to.
    pub fn evict_older_than<F>(&mut self, cutoff: DateTime<Utc>, keep: F) -> Vec<AgentId>
    where
        F: Fn(&Agent) -> bool,
    {
        let stale: Vec<AgentId> = self
            .agents
            .values()
            .filter(|a| a.last_seen < cutoff && !keep(a))
            .map(|a| a.id.clone())
            .collect();

        for id in &stale {
            self.agents.remove(id);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "Evicted stale agents");
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

// Clock reads can repeat; last_seen must still move forward.
fn advance(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}
