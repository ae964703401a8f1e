//! Bounded message archive.
//!
//! Records are kept oldest-first in a ring of fixed capacity; appending
//! past capacity evicts exactly one record from the front. Nothing is
//! persisted.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use meshgate_shared::constants::{DEFAULT_ARCHIVE_CAPACITY, DEFAULT_QUERY_LIMIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Message,
    Announce,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    pub sender: String,
    pub content: Value,
    pub metadata: Map<String, Value>,
    pub kind: MessageKind,
}

impl MessageRecord {
    pub fn new(
        channel: impl Into<String>,
        sender: impl Into<String>,
        content: Value,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            channel: channel.into(),
            sender: sender.into(),
            content,
            metadata: Map::new(),
            kind,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Filter and page parameters. Absent filters match everything.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessageQuery {
    pub channel: Option<String>,
    pub sender: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            channel: None,
            sender: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

impl MessageQuery {
    fn matches(&self, record: &MessageRecord) -> bool {
        self.channel.as_ref().map_or(true, |c| &record.channel == c)
            && self.sender.as_ref().map_or(true, |s| &record.sender == s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessageRecord>,
    /// Size of the filtered set before paging.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug)]
pub struct MessageArchive {
    records: VecDeque<MessageRecord>,
    capacity: usize,
}

impl MessageArchive {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append a record, returning the one evicted to make room, if any.
    pub fn archive(&mut self, record: MessageRecord) -> Option<MessageRecord> {
        self.records.push_back(record);
        if self.records.len() > self.capacity {
            self.records.pop_front()
        } else {
            None
        }
    }

    /// Filtered records in arrival order, sliced to `[offset, offset + limit)`.
    pub fn query(&self, query: &MessageQuery) -> MessagePage {
        let filtered: Vec<&MessageRecord> =
            self.records.iter().filter(|r| query.matches(r)).collect();
        let total = filtered.len();
        let messages = filtered
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();

        MessagePage {
            messages,
            total,
            limit: query.limit,
            offset: query.offset,
        }
    }

    pub fn latest(&self) -> Option<&MessageRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageRecord> {
        self.records.iter()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MessageArchive {
    fn default() -> Self {
        Self::new(DEFAULT_ARCHIVE_CAPACITY)
    }
}
