// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Inter-Agent Messages
//!
//! Messages are addressed to one agent or broadcast (`to = None`). Topics are
//! a closed, versioned set; payloads carry their own schema version. Expiry
//! is a read-time filter; rows are only removed by the purge sweep.

use chrono::{DateTime, Duration, Utc};
use conductor_core::domain::agent::AgentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Version of the topic set below. Bump when a topic is added or removed.
pub const TOPIC_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageTopic {
    #[serde(rename = "task.started")]
    TaskStarted,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.failed")]
    TaskFailed,
    #[serde(rename = "file.modified")]
    FileModified,
    #[serde(rename = "api.changed")]
    ApiChanged,
    #[serde(rename = "schema.changed")]
    SchemaChanged,
    #[serde(rename = "context.updated")]
    ContextUpdated,
    #[serde(rename = "question")]
    Question,
    #[serde(rename = "answer")]
    Answer,
    #[serde(rename = "blocking.requested")]
    BlockingRequested,
    #[serde(rename = "blocking.released")]
    BlockingReleased,
    #[serde(rename = "capacity.warning")]
    CapacityWarning,
    #[serde(rename = "compact.requested")]
    CompactRequested,
    #[serde(rename = "wave.completed")]
    WaveCompleted,
    #[serde(rename = "broadcast")]
    Broadcast,
}

impl MessageTopic {
    pub const ALL: [MessageTopic; 15] = [
        MessageTopic::TaskStarted,
        MessageTopic::TaskCompleted,
        MessageTopic::TaskFailed,
        MessageTopic::FileModified,
        MessageTopic::ApiChanged,
        MessageTopic::SchemaChanged,
        MessageTopic::ContextUpdated,
        MessageTopic::Question,
        MessageTopic::Answer,
        MessageTopic::BlockingRequested,
        MessageTopic::BlockingReleased,
        MessageTopic::CapacityWarning,
        MessageTopic::CompactRequested,
        MessageTopic::WaveCompleted,
        MessageTopic::Broadcast,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageTopic::TaskStarted => "task.started",
            MessageTopic::TaskCompleted => "task.completed",
            MessageTopic::TaskFailed => "task.failed",
            MessageTopic::FileModified => "file.modified",
            MessageTopic::ApiChanged => "api.changed",
            MessageTopic::SchemaChanged => "schema.changed",
            MessageTopic::ContextUpdated => "context.updated",
            MessageTopic::Question => "question",
            MessageTopic::Answer => "answer",
            MessageTopic::BlockingRequested => "blocking.requested",
            MessageTopic::BlockingReleased => "blocking.released",
            MessageTopic::CapacityWarning => "capacity.warning",
            MessageTopic::CompactRequested => "compact.requested",
            MessageTopic::WaveCompleted => "wave.completed",
            MessageTopic::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for MessageTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageTopic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageTopic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| format!("unknown topic '{s}' (topic set v{TOPIC_SCHEMA_VERSION})"))
    }
}

/// Delivery priority. Higher values are fetched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "PriorityRepr")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// Priorities arrive either as level numbers or as names.
#[derive(Deserialize)]
#[serde(untagged)]
enum PriorityRepr {
    Level(u8),
    Name(String),
}

impl TryFrom<PriorityRepr> for Priority {
    type Error = String;

    fn try_from(value: PriorityRepr) -> Result<Self, Self::Error> {
        match value {
            PriorityRepr::Level(level) => Priority::try_from(level),
            PriorityRepr::Name(name) => name.parse(),
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Critical),
            other => Err(format!("priority must be 0-3, got {other}")),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

impl Priority {
    pub fn level(self) -> u8 {
        self as u8
    }
}

/// Versioned message body.
///
/// A JSON object of exactly `{schema_version, body}` decodes as-is; any other
/// JSON value is wrapped as the body of a version 1 payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct MessagePayload {
    pub schema_version: u32,
    pub body: Value,
}

impl MessagePayload {
    pub fn new(body: Value) -> Self {
        Self {
            schema_version: 1,
            body,
        }
    }

    /// `body.summary` when present, for one-line digests.
    pub fn summary(&self) -> Option<&str> {
        self.body.get("summary").and_then(Value::as_str)
    }
}

impl From<Value> for MessagePayload {
    fn from(value: Value) -> Self {
        if let Value::Object(map) = &value {
            if map.len() == 2 && map.contains_key("body") {
                if let Some(version) = map.get("schema_version").and_then(Value::as_u64) {
                    return Self {
                        schema_version: version as u32,
                        body: map.get("body").cloned().unwrap_or(Value::Null),
                    };
                }
            }
        }
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: AgentId,
    /// `None` for a broadcast.
    pub to: Option<AgentId>,
    pub topic: MessageTopic,
    pub payload: MessagePayload,
    pub priority: Priority,
    pub read_by: Vec<AgentId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        from: AgentId,
        to: Option<AgentId>,
        topic: MessageTopic,
        payload: MessagePayload,
        priority: Priority,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(),
            from,
            to,
            topic,
            payload,
            priority,
            read_by: Vec::new(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Direct messages to `agent`, and broadcasts when asked for.
    pub fn is_addressed_to(&self, agent: &AgentId, include_broadcasts: bool) -> bool {
        match &self.to {
            Some(to) => to == agent,
            None => include_broadcasts,
        }
    }

    pub fn is_read_by(&self, agent: &AgentId) -> bool {
        self.read_by.contains(agent)
    }

    /// Record `agent` as a reader. Returns false if it already was one.
    pub fn mark_read(&mut self, agent: &AgentId) -> bool {
        if self.is_read_by(agent) {
            return false;
        }
        self.read_by.push(agent.clone());
        true
    }
}

/// Filters for one fetch. `limit` is already resolved against the
/// configured bounds by the time it reaches a store.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    pub since: Option<DateTime<Utc>>,
    pub topic: Option<MessageTopic>,
    pub include_broadcasts: bool,
    pub limit: u32,
}

impl FetchQuery {
    pub fn matches(&self, message: &Message, agent: &AgentId, now: DateTime<Utc>) -> bool {
        !message.is_expired(now)
            && message.is_addressed_to(agent, self.include_broadcasts)
            && self.since.is_none_or(|since| message.created_at > since)
            && self.topic.is_none_or(|topic| message.topic == topic)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResult {
    pub messages: Vec<Message>,
    /// Unread messages left for the agent after this fetch marked its page.
    pub unread_count: u64,
}

/// Priority desc, then oldest first. Callers keep insertion order for ties.
pub fn delivery_order(a: &Message, b: &Message) -> std::cmp::Ordering {
    b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_set_is_closed() {
        assert_eq!("task.completed".parse::<MessageTopic>(), Ok(MessageTopic::TaskCompleted));
        assert!("task.exploded".parse::<MessageTopic>().is_err());
        assert!(serde_json::from_value::<MessageTopic>(json!("gossip")).is_err());
        for topic in MessageTopic::ALL {
            assert_eq!(topic.as_str().parse::<MessageTopic>(), Ok(topic));
        }
    }

    #[test]
    fn test_priority_accepts_levels_and_names() {
        assert_eq!(serde_json::from_value::<Priority>(json!(2)).unwrap(), Priority::High);
        assert_eq!(serde_json::from_value::<Priority>(json!("critical")).unwrap(), Priority::Critical);
        assert!(serde_json::from_value::<Priority>(json!(7)).is_err());
        assert!(Priority::Critical > Priority::Low);
    }

    #[test]
    fn test_payload_wraps_bare_json() {
        let bare: MessagePayload = serde_json::from_value(json!({"summary": "done"})).unwrap();
        assert_eq!(bare.schema_version, 1);
        assert_eq!(bare.summary(), Some("done"));

        let versioned: MessagePayload = serde_json::from_value(json!({"schema_version": 2, "body": [1]})).unwrap();
        assert_eq!(versioned.schema_version, 2);
        assert_eq!(versioned.body, json!([1]));
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut message = Message::new(
            AgentId::from("a"),
            None,
            MessageTopic::Broadcast,
            MessagePayload::new(json!({})),
            Priority::Normal,
            Duration::hours(1),
        );
        let reader = AgentId::from("b");
        assert!(message.mark_read(&reader));
        assert!(!message.mark_read(&reader));
        assert_eq!(message.read_by.len(), 1);
    }

    #[test]
    fn test_expired_broadcast_is_not_matched() {
        let mut message = Message::new(
            AgentId::from("a"),
            None,
            MessageTopic::Broadcast,
            MessagePayload::new(json!({})),
            Priority::Normal,
            Duration::seconds(10),
        );
        let query = FetchQuery {
            since: None,
            topic: None,
            include_broadcasts: true,
            limit: 10,
        };
        let reader = AgentId::from("b");
        assert!(query.matches(&message, &reader, Utc::now()));
        message.expires_at = Utc::now() - Duration::seconds(1);
        assert!(!query.matches(&message, &reader, Utc::now()));
    }
}
