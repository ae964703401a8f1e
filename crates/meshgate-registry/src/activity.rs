//! Activity counters and hourly aggregates.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

const HOUR_BUCKET_FORMAT: &str = "%Y-%m-%dT%H";

/// Something worth counting.
#[derive(Debug, Clone, Copy)]
pub enum ActivityEvent<'a> {
    MessageReceived {
        at: DateTime<Utc>,
        sender: &'a str,
        channel: &'a str,
    },
    MessageSent {
        at: DateTime<Utc>,
        sender: &'a str,
        channel: &'a str,
    },
    AgentDiscovered {
        at: DateTime<Utc>,
        agent: &'a str,
    },
    ChannelDiscovered {
        at: DateTime<Utc>,
        channel: &'a str,
    },
}

impl ActivityEvent<'_> {
    fn at(&self) -> DateTime<Utc> {
        match self {
            ActivityEvent::MessageReceived { at, .. }
            | ActivityEvent::MessageSent { at, .. }
            | ActivityEvent::AgentDiscovered { at, .. }
            | ActivityEvent::ChannelDiscovered { at, .. } => *at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCounters {
    pub messages_received: u64,
    pub messages_sent: u64,
    pub agents_discovered: u64,
    pub channels_discovered: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HourBucket {
    pub messages: u64,
    pub agents: BTreeSet<String>,
    pub channels: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlySummary {
    pub hour: String,
    pub messages: u64,
    pub agents: usize,
    pub channels: usize,
}

/// Live table sizes, supplied by the owner of the tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cardinalities {
    pub peers: usize,
    pub agents: usize,
    pub channels: usize,
    pub sessions: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub counters: ActivityCounters,
    /// Messages received per second since start.
    pub message_rate: f64,
    pub live: Cardinalities,
}

#[derive(Debug)]
pub struct ActivityTracker {
    started_at: DateTime<Utc>,
    counters: ActivityCounters,
    buckets: BTreeMap<String, HourBucket>,
}

impl ActivityTracker {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            counters: ActivityCounters::default(),
            buckets: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, event: ActivityEvent<'_>) {
        let bucket = self.buckets.entry(hour_key(event.at())).or_default();

        match event {
            ActivityEvent::MessageReceived { sender, channel, .. } => {
                self.counters.messages_received += 1;
                bucket.messages += 1;
                bucket.agents.insert(sender.to_string());
                bucket.channels.insert(channel.to_string());
            }
            ActivityEvent::MessageSent { sender, channel, .. } => {
                self.counters.messages_sent += 1;
                bucket.messages += 1;
                bucket.agents.insert(sender.to_string());
                bucket.channels.insert(channel.to_string());
            }
            ActivityEvent::AgentDiscovered { agent, .. } => {
                self.counters.agents_discovered += 1;
                bucket.agents.insert(agent.to_string());
            }
            ActivityEvent::ChannelDiscovered { channel, .. } => {
                self.counters.channels_discovered += 1;
                bucket.channels.insert(channel.to_string());
            }
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>, live: Cardinalities) -> ActivitySnapshot {
        let elapsed_ms = (now - self.started_at).num_milliseconds().max(0);
        let elapsed_secs = elapsed_ms as f64 / 1000.0;
        let message_rate = if elapsed_secs > 0.0 {
            self.counters.messages_received as f64 / elapsed_secs
        } else {
            0.0
        };

        ActivitySnapshot {
            started_at: self.started_at,
            uptime_secs: (elapsed_ms / 1000) as u64,
            counters: self.counters,
            message_rate,
            live,
        }
    }

    pub fn counters(&self) -> ActivityCounters {
        self.counters
    }

    pub fn bucket(&self, at: DateTime<Utc>) -> Option<&HourBucket> {
        self.buckets.get(&hour_key(at))
    }

    /// Per-hour rollup, oldest hour first.
    pub fn hourly(&self) -> Vec<HourlySummary> {
        self.buckets
            .iter()
            .map(|(hour, b)| HourlySummary {
                hour: hour.clone(),
                messages: b.messages,
                agents: b.agents.len(),
                channels: b.channels.len(),
            })
            .collect()
    }

    /// Drop buckets for hours strictly before the hour containing `cutoff`.
    pub fn evict_buckets_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let keep = self.buckets.split_off(&hour_key(cutoff));
        let evicted = self.buckets.len();
        self.buckets = keep;
        evicted
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

// Fixed-width keys sort chronologically.
fn hour_key(at: DateTime<Utc>) -> String {
    at.format(HOUR_BUCKET_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_counters_and_buckets() {
        let mut tracker = ActivityTracker::new(t(9, 0));
        tracker.record(ActivityEvent::MessageReceived {
            at: t(10, 5),
            sender: "a",
            channel: "alpha",
        });
        tracker.record(ActivityEvent::MessageReceived {
            at: t(10, 40),
            sender: "b",
            channel: "alpha",
        });
        tracker.record(ActivityEvent::MessageSent { at: t(11, 1), sender: "a", channel: "beta" });
        tracker.record(ActivityEvent::AgentDiscovered { at: t(11, 2), agent: "c" });
        tracker.record(ActivityEvent::ChannelDiscovered { at: t(11, 3), channel: "gamma" });

        let counters = tracker.counters();
        assert_eq!(counters.messages_received, 2);
        assert_eq!(counters.messages_sent, 1);
        assert_eq!(counters.agents_discovered, 1);
        assert_eq!(counters.channels_discovered, 1);

        let ten = tracker.bucket(t(10, 59)).unwrap();
        assert_eq!(ten.messages, 2);
        assert_eq!(ten.agents.len(), 2);
        assert_eq!(ten.channels.len(), 1);

        let eleven = tracker.bucket(t(11, 0)).unwrap();
        assert_eq!(eleven.messages, 1);
        assert_eq!(eleven.agents.len(), 2);
        assert_eq!(eleven.channels.len(), 2);

        let hours: Vec<String> = tracker.hourly().into_iter().map(|h| h.hour).collect();
        assert_eq!(hours, vec!["2026-03-01T10", "2026-03-01T11"]);
    }

    #[test]
    fn test_rate_is_zero_without_elapsed_time() {
        let mut tracker = ActivityTracker::new(t(9, 0));
        tracker.record(ActivityEvent::MessageReceived { at: t(9, 0), sender: "a", channel: "x" });
        let snap = tracker.snapshot(t(9, 0), Cardinalities::default());
        assert_eq!(snap.message_rate, 0.0);
        assert_eq!(snap.uptime_secs, 0);
    }

    #[test]
    fn test_rate_over_elapsed_seconds() {
        let mut tracker = ActivityTracker::new(t(9, 0));
        for _ in 0..30 {
            tracker.record(ActivityEvent::MessageReceived {
                at: t(9, 0),
                sender: "a",
                channel: "x",
            });
        }
        let live = Cardinalities { peers: 1, agents: 2, channels: 3, sessions: 4 };
        let snap = tracker.snapshot(t(9, 0) + Duration::seconds(60), live);
        assert!((snap.message_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snap.uptime_secs, 60);
        assert_eq!(snap.live, live);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["messagesReceived"], 30);
        assert_eq!(json["live"]["sessions"], 4);
    }

    #[test]
    fn test_evict_buckets_before() {
        let mut tracker = ActivityTracker::new(t(0, 0));
        for h in 0..5 {
            tracker.record(ActivityEvent::ChannelDiscovered { at: t(h, 30), channel: "x" });
        }
        assert_eq!(tracker.evict_buckets_before(t(3, 10)), 3);
        assert_eq!(tracker.bucket_count(), 2);
        assert!(tracker.bucket(t(3, 0)).is_some());
        assert!(tracker.bucket(t(2, 0)).is_none());
        // Counters are monotonic and unaffected.
        assert_eq!(tracker.counters().channels_discovered, 5);
    }
}
