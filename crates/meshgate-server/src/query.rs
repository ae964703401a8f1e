//! Read-only views shared by the command protocol and the HTTP API.

use chrono::Utc;
use serde::Serialize;

use meshgate_registry::{ActivitySnapshot, Agent, Cardinalities, Channel, HourlySummary};
use meshgate_shared::constants::PROTOCOL_VERSION;
use meshgate_shared::{AgentId, PeerKey, RelayError};

use crate::hub::{agent_online, Hub};

const HTTP_ENDPOINTS: &[&str] = &[
    "GET /health",
    "GET /ws",
    "GET /api/info",
    "GET /api/peers",
    "GET /api/peers/:id",
    "GET /api/agents",
    "GET /api/agents/:id",
    "GET /api/channels",
    "POST /api/channels",
    "GET /api/channels/:key",
    "DELETE /api/channels/:key (or channel name)",
    "GET /api/messages",
    "GET /api/activity",
    "GET /api/graph",
    "GET /api/clients",
];

const COMMANDS: &[&str] = &[
    "auth",
    "ping",
    "join",
    "leave",
    "announce",
    "list-peers",
    "list-agents",
    "get-agent",
    "list-channels",
    "get-channel",
    "list-messages",
    "get-activity",
    "get-graph",
    "get-stats",
    "get-info",
    "list-clients",
];

const RELAY_ACTIONS: &[&str] = &["auth", "join", "leave", "send"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDetail {
    #[serde(flatten)]
    pub channel: Channel,
    pub peer_count: usize,
    /// Eligible for cross-transport relay.
    pub public: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityView {
    #[serde(flatten)]
    pub snapshot: ActivitySnapshot,
    pub hourly: Vec<HourlySummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    #[serde(flatten)]
    pub snapshot: ActivitySnapshot,
    pub archived: usize,
    pub archive_capacity: usize,
    pub public_channels: Vec<String>,
}

/// Capability and endpoint descriptor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    pub version: &'static str,
    pub protocol: &'static str,
    pub peer_id: PeerKey,
    pub auth_required: bool,
    pub public_channels: Vec<String>,
    pub channels: Vec<String>,
    pub endpoints: &'static [&'static str],
    pub commands: &'static [&'static str],
    pub relay_actions: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[serde(rename = "self")]
    Local,
    Agent,
    Channel,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Connection,
    Subscription,
    Hosted,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

const SELF_NODE: &str = "self";

fn channel_node_id(channel: &Channel) -> String {
    format!("channel:{}", channel.key.to_hex())
}

impl Hub {
    pub fn cardinalities(&self) -> Cardinalities {
        Cardinalities {
            peers: self.peers.len(),
            agents: self.agents.len(),
            channels: self.topics.len(),
            sessions: self.sessions.len(),
        }
    }

    fn is_online(&self, agent: &Agent) -> bool {
        agent_online(agent, &self.peers, &self.sessions)
    }

    pub fn agent_views(&self) -> Vec<AgentView> {
        self.agents
            .list()
            .into_iter()
            .map(|agent| {
                let online = self.is_online(&agent);
                AgentView { agent, online }
            })
            .collect()
    }

    pub fn agent_view(&self, id: &str) -> Result<AgentView, RelayError> {
        let agent = self
            .agents
            .get(&AgentId::new(id))
            .ok_or_else(|| RelayError::NotFound(format!("agent {id}")))?;
        Ok(AgentView {
            online: self.is_online(agent),
            agent: agent.clone(),
        })
    }

    pub fn channel_detail(&self, key_hex: &str) -> Result<ChannelDetail, RelayError> {
        let channel = self
            .topics
            .find(key_hex)
            .map_err(|_| RelayError::NotFound(format!("channel {key_hex}")))?;
        Ok(ChannelDetail {
            peer_count: channel.peer_count(),
            public: self.relay.is_public(&channel.name),
            channel: channel.clone(),
        })
    }

    pub fn activity_view(&self) -> ActivityView {
        ActivityView {
            snapshot: self.activity.snapshot(Utc::now(), self.cardinalities()),
            hourly: self.activity.hourly(),
        }
    }

    pub fn stats(&self) -> Stats {
        Stats {
            snapshot: self.activity.snapshot(Utc::now(), self.cardinalities()),
            archived: self.archive.len(),
            archive_capacity: self.archive.capacity(),
            public_channels: self.relay.public_channels(),
        }
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            name: self.instance_name.clone(),
            version: env!("CARGO_PKG_VERSION"),
            protocol: PROTOCOL_VERSION,
            peer_id: self.local_peer.clone(),
            auth_required: self.auth_token.is_some(),
            public_channels: self.relay.public_channels(),
            channels: self.topics.names(),
            endpoints: HTTP_ENDPOINTS,
            commands: COMMANDS,
            relay_actions: RELAY_ACTIONS,
        }
    }

    pub fn graph(&self) -> Graph {
        let mut graph = Graph::default();
        graph.nodes.push(GraphNode {
            id: SELF_NODE.to_string(),
            kind: NodeKind::Local,
            label: self.instance_name.clone(),
            online: None,
        });

        let mut channels: Vec<&Channel> = self.topics.channels().collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        for channel in &channels {
            let id = channel_node_id(channel);
            graph.nodes.push(GraphNode {
                id: id.clone(),
                kind: NodeKind::Channel,
                label: channel.name.clone(),
                online: None,
            });
            graph.edges.push(GraphEdge {
                source: id,
                target: SELF_NODE.to_string(),
                kind: EdgeKind::Hosted,
            });
        }

        for agent in self.agents.list() {
            let online = self.is_online(&agent);
            let agent_node = agent.id.to_string();
            graph.nodes.push(GraphNode {
                id: agent_node.clone(),
                kind: NodeKind::Agent,
                label: agent.name.clone().unwrap_or_else(|| agent.id.to_string()),
                online: Some(online),
            });
            if online {
                graph.edges.push(GraphEdge {
                    source: agent_node.clone(),
                    target: SELF_NODE.to_string(),
                    kind: EdgeKind::Connection,
                });
            }
            for name in &agent.channels {
                if let Some(channel) = self.topics.get_by_name(name) {
                    graph.edges.push(GraphEdge {
                        source: agent_node.clone(),
                        target: channel_node_id(channel),
                        kind: EdgeKind::Subscription,
                    });
                }
            }
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::testing::*;
    use meshgate_shared::JoinMode;

    #[test]
    fn test_graph_shape() {
        let (mut hub, _) = hub();
        let key = hub.join_channel("alpha", JoinMode::default()).unwrap().key();
        let online = PeerKey::new("12D3KooWOnline");
        let offline = PeerKey::new("12D3KooWOffline");
        hub.on_peer_connected(online.clone(), "a".into(), false);
        hub.on_peer_subscribed(&online, &key.to_topic());
        hub.on_peer_connected(offline.clone(), "b".into(), false);
        hub.on_peer_disconnected(&offline);

        let graph = hub.graph();
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.nodes[0].id, "self");

        let kinds = |kind: EdgeKind| graph.edges.iter().filter(|e| e.kind == kind).count();
        assert_eq!(kinds(EdgeKind::Hosted), 1);
        assert_eq!(kinds(EdgeKind::Connection), 1);
        assert_eq!(kinds(EdgeKind::Subscription), 1);

        let sub = graph
            .edges
            .iter()
            .find(|e| e.kind == EdgeKind::Subscription)
            .unwrap();
        assert_eq!(sub.source, online.as_str());
        assert_eq!(sub.target, format!("channel:{}", key.to_hex()));

        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(json["nodes"][0]["kind"], "self");
    }

    #[test]
    fn test_agent_listing_after_disconnect() {
        let (mut hub, _) = hub();
        let peer = PeerKey::new("12D3KooWPeer");
        hub.on_peer_connected(peer.clone(), "a".into(), true);
        hub.on_peer_disconnected(&peer);

        let agents = hub.agent_views();
        assert_eq!(agents.len(), 1);
        assert!(!agents[0].online);
        assert!(hub.peers.list().is_empty());
        assert_eq!(hub.cardinalities().agents, 1);
    }

    #[test]
    fn test_lookups_not_found() {
        let (hub, _) = hub();
        assert_eq!(hub.agent_view("ghost").unwrap_err().code(), "not-found");
        assert_eq!(hub.channel_detail("zz").unwrap_err().code(), "not-found");
    }

    #[test]
    fn test_info_descriptor() {
        let (hub, _) = hub();
        let info = hub.info();
        assert_eq!(info.name, "meshgate");
        assert!(!info.auth_required);
        assert!(info.public_channels.contains(&"agent-marketplace".to_string()));
        assert!(info.commands.contains(&"get-graph"));
    }
}
