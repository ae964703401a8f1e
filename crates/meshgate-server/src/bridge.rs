//! Glue between the swarm task and the hub.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use meshgate_net::SwarmNotification;
use meshgate_shared::PeerKey;

use crate::hub::{Hub, SharedHub};

const SWEEP_INTERVAL_SECS: u64 = 60;

// Longer TTLs are clamped to about ten years.
const MAX_AGENT_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Feed swarm notifications into the hub until the swarm stops.
pub async fn notification_loop(hub: SharedHub, mut notif_rx: mpsc::Receiver<SwarmNotification>) {
    info!("Swarm notification bridge started");

    while let Some(notification) = notif_rx.recv().await {
        let mut hub = hub.lock().await;
        apply_notification(&mut hub, notification);
    }

    warn!("Swarm notification loop ended");
}

pub(crate) fn apply_notification(hub: &mut Hub, notification: SwarmNotification) {
    match notification {
        SwarmNotification::PeerConnected {
            peer_id,
            address,
            initiator,
        } => {
            hub.on_peer_connected(
                PeerKey::new(peer_id.to_string()),
                address.to_string(),
                initiator,
            );
        }

        SwarmNotification::PeerDisconnected { peer_id } => {
            hub.on_peer_disconnected(&PeerKey::new(peer_id.to_string()));
        }

        SwarmNotification::PeerSubscribed { peer_id, topic } => {
            hub.on_peer_subscribed(&PeerKey::new(peer_id.to_string()), &topic);
        }

        SwarmNotification::PeerUnsubscribed { peer_id, topic } => {
            hub.on_peer_unsubscribed(&PeerKey::new(peer_id.to_string()), &topic);
        }

        SwarmNotification::MessageReceived {
            source,
            topic,
            data,
        } => {
            debug!(
                topic = %topic,
                source = ?source,
                len = data.len(),
                "Message received on bridge"
            );
            let source = source.map(|p| PeerKey::new(p.to_string()));
            hub.on_peer_message(source, &topic, &data);
        }
    }
}

/// Periodically evict stale agents and old activity buckets.
pub async fn sweep_loop(hub: SharedHub, agent_ttl_secs: u64) {
    let ttl = Duration::seconds(agent_ttl_secs.min(MAX_AGENT_TTL_SECS) as i64);
    let mut interval = tokio::time::interval(StdDuration::from_secs(SWEEP_INTERVAL_SECS));
    loop {
        interval.tick().await;
        let report = hub.lock().await.sweep(Utc::now(), ttl);
        debug!(agents = report.agents, buckets = report.buckets, "Sweep finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::testing::*;
    use libp2p::{Multiaddr, PeerId};
    use meshgate_shared::crypto::derive_channel_key;
    use meshgate_shared::{AgentId, JoinMode};

    #[test]
    fn test_notifications_drive_tables() {
        let (mut hub, _) = hub();
        let key = hub.join_channel("alpha", JoinMode::default()).unwrap().key();
        let peer_id = PeerId::random();
        let peer = PeerKey::new(peer_id.to_string());
        let address: Multiaddr = "/ip4/10.0.0.9/udp/4001/quic-v1".parse().unwrap();

        apply_notification(
            &mut hub,
            SwarmNotification::PeerConnected {
                peer_id,
                address: address.clone(),
                initiator: true,
            },
        );
        apply_notification(
            &mut hub,
            SwarmNotification::PeerSubscribed {
                peer_id,
                topic: key.to_topic(),
            },
        );
        apply_notification(
            &mut hub,
            SwarmNotification::MessageReceived {
                source: Some(peer_id),
                topic: derive_channel_key("alpha").to_topic(),
                data: br#"{"kind":"message","content":"hi"}"#.to_vec(),
            },
        );

        let record = hub.peers.get(&peer).unwrap();
        assert_eq!(record.address, address.to_string());
        assert!(record.is_initiator);
        assert!(record.channels.contains(&key));
        assert_eq!(hub.archive.latest().unwrap().sender, peer.as_str());

        apply_notification(&mut hub, SwarmNotification::PeerDisconnected { peer_id });
        assert!(hub.peers.is_empty());
        assert!(hub.agents.contains(&AgentId::from(&peer)));
    }

    #[tokio::test]
    async fn test_loop_ends_when_swarm_stops() {
        let (hub, _) = hub();
        let hub = std::sync::Arc::new(tokio::sync::Mutex::new(hub));
        let (tx, rx) = mpsc::channel(4);
        tx.send(SwarmNotification::PeerDisconnected {
            peer_id: PeerId::random(),
        })
        .await
        .unwrap();
        drop(tx);

        notification_loop(hub.clone(), rx).await;
        assert!(hub.lock().await.peers.is_empty());
    }
}
