// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Sessions & Requests
//!
//! A [`Session`] is one operator interaction stream; a [`Request`] is one
//! operator prompt inside it and owns the ordered set of waves. Both are
//! plain records owned by the surrounding CRUD layer — the engine only
//! needs to find the current request, stamp snapshot metadata onto it and
//! derive its terminal status from its waves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque session identifier issued by the hook layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    pub compacted_at: Option<DateTime<Utc>>,
    pub compact_count: u32,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            status: SessionStatus::Active,
            compacted_at: None,
            compact_count: 0,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn mark_compacted(&mut self, at: DateTime<Utc>) {
        self.compacted_at = Some(at);
        self.compact_count += 1;
    }

    pub fn end(&mut self, at: DateTime<Utc>) {
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::Ended;
            self.ended_at = Some(at);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Request status. Terminal values are derived from the request's waves and
/// never set directly by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Active,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Active => "active",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RequestStatus::Active),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(format!("unknown request status '{other}'")),
        }
    }
}

/// Typed view of the request's JSON metadata column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_snapshot_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_snapshot_trigger: Option<String>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub session_id: SessionId,
    pub prompt: Option<String>,
    pub status: RequestStatus,
    pub metadata: RequestMetadata,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(session_id: SessionId, prompt: Option<String>) -> Self {
        Self {
            id: RequestId::new(),
            session_id,
            prompt,
            status: RequestStatus::Active,
            metadata: RequestMetadata::default(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to a terminal status. Returns `false` (and changes nothing) if
    /// the request already reached one.
    pub fn finish(&mut self, status: RequestStatus, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_terminal_status_is_sticky() {
        let mut request = Request::new(SessionId::from("s-1"), None);
        assert!(request.finish(RequestStatus::Failed, Utc::now()));
        assert!(!request.finish(RequestStatus::Completed, Utc::now()));
        assert_eq!(request.status, RequestStatus::Failed);
    }

    #[test]
    fn test_request_metadata_keeps_unknown_keys() {
        let metadata: RequestMetadata = serde_json::from_value(serde_json::json!({
            "last_snapshot_trigger": "manual",
            "origin": "hook"
        }))
        .unwrap();
        assert_eq!(metadata.last_snapshot_trigger.as_deref(), Some("manual"));
        assert_eq!(metadata.extra.get("origin").and_then(|v| v.as_str()), Some("hook"));
    }
}
