// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Subtask Aggregate
//!
//! One unit of agent work, owned by exactly one wave and optionally tagged
//! with the batch that submitted it.
//!
//! Status transitions only move forward: nothing returns to `pending`, and
//! `completed` / `failed` are absorbing. `started_at` and `completed_at` are
//! stamped the first time they apply and never again.

use crate::domain::agent::AgentId;
use crate::domain::batch::BatchId;
use crate::domain::session::{RequestId, SessionId};
use crate::domain::wave::WaveId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Current schema version of [`SubtaskResult`] payloads.
pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// Keys that agents use to report the files they touched.
pub const RESULT_FILE_KEYS: [&str; 4] = ["files", "file_paths", "changed_files", "modified_files"];

const RESULT_SUMMARY_KEYS: [&str; 3] = ["summary", "output", "message"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubtaskId(pub Uuid);

impl SubtaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubtaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Paused,
    Blocked,
    Completed,
    Failed,
}

impl SubtaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubtaskStatus::Completed | SubtaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::Running => "running",
            SubtaskStatus::Paused => "paused",
            SubtaskStatus::Blocked => "blocked",
            SubtaskStatus::Completed => "completed",
            SubtaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The statuses a subtask may be created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialStatus {
    Pending,
    Running,
}

impl From<InitialStatus> for SubtaskStatus {
    fn from(status: InitialStatus) -> Self {
        match status {
            InitialStatus::Pending => SubtaskStatus::Pending,
            InitialStatus::Running => SubtaskStatus::Running,
        }
    }
}

impl TryFrom<SubtaskStatus> for InitialStatus {
    type Error = SubtaskStatus;

    fn try_from(status: SubtaskStatus) -> Result<Self, Self::Error> {
        match status {
            SubtaskStatus::Pending => Ok(InitialStatus::Pending),
            SubtaskStatus::Running => Ok(InitialStatus::Running),
            other => Err(other),
        }
    }
}

impl FromStr for SubtaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubtaskStatus::Pending),
            "running" => Ok(SubtaskStatus::Running),
            "paused" => Ok(SubtaskStatus::Paused),
            "blocked" => Ok(SubtaskStatus::Blocked),
            "completed" => Ok(SubtaskStatus::Completed),
            "failed" => Ok(SubtaskStatus::Failed),
            other => Err(format!("unknown subtask status '{other}'")),
        }
    }
}

/// Structured result reported by an agent.
///
/// Agents send loosely shaped JSON; decoding folds the known summary and
/// file-list keys into typed fields and keeps everything else in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct SubtaskResult {
    pub schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SubtaskResult {
    /// Result stamped on orphans by the session-end sweep.
    pub fn session_ended() -> Self {
        let mut extra = Map::new();
        extra.insert("session_ended".to_string(), Value::Bool(true));
        Self {
            schema_version: RESULT_SCHEMA_VERSION,
            summary: Some("Closed by session end".to_string()),
            extra,
            ..Default::default()
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            schema_version: RESULT_SCHEMA_VERSION,
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Approximate size of the raw payload, used by the tokens-saved heuristic.
    pub fn raw_len(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

impl From<Value> for SubtaskResult {
    fn from(value: Value) -> Self {
        let mut object = match value {
            Value::Object(object) => object,
            Value::Null => Map::new(),
            Value::String(text) => {
                return Self {
                    schema_version: RESULT_SCHEMA_VERSION,
                    summary: Some(text),
                    ..Default::default()
                }
            }
            other => {
                return Self {
                    schema_version: RESULT_SCHEMA_VERSION,
                    summary: Some(other.to_string()),
                    ..Default::default()
                }
            }
        };

        let schema_version = object
            .remove("schema_version")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(RESULT_SCHEMA_VERSION);

        let mut summary = None;
        for key in RESULT_SUMMARY_KEYS {
            if let Some(Value::String(text)) = object.get(key) {
                summary = Some(text.clone());
                object.remove(key);
                break;
            }
        }

        let mut files: Vec<String> = Vec::new();
        for key in RESULT_FILE_KEYS {
            if let Some(Value::Array(entries)) = object.remove(key) {
                for entry in entries {
                    if let Value::String(path) = entry {
                        if !files.contains(&path) {
                            files.push(path);
                        }
                    }
                }
            }
        }

        let error = match object.remove("error") {
            Some(Value::String(text)) => Some(text),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        Self {
            schema_version,
            summary,
            files,
            error,
            extra: object,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub session_id: SessionId,
    pub request_id: RequestId,
    pub wave_id: WaveId,
    pub wave_number: u32,
    pub batch_id: Option<BatchId>,
    pub description: String,
    pub agent_type: Option<String>,
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub blocked_by: BTreeSet<SubtaskId>,
    pub priority: i32,
    pub status: SubtaskStatus,
    pub result: Option<SubtaskResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of asking a subtask to change status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied { from: SubtaskStatus },
    /// Already in the requested status, or already terminal.
    Unchanged,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubtaskTransitionError {
    #[error("Subtask cannot move from {from} back to {to}")]
    Backwards { from: SubtaskStatus, to: SubtaskStatus },
}

impl Subtask {
    /// Build a subtask for a wave, pending or already running.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        request_id: RequestId,
        wave_id: WaveId,
        wave_number: u32,
        description: impl Into<String>,
        agent_type: Option<String>,
        agent_id: Option<AgentId>,
        status: InitialStatus,
    ) -> Self {
        let now = Utc::now();
        let status = SubtaskStatus::from(status);
        Self {
            id: SubtaskId::new(),
            session_id,
            request_id,
            wave_id,
            wave_number,
            batch_id: None,
            description: description.into(),
            agent_type,
            agent_id,
            blocked_by: BTreeSet::new(),
            priority: 0,
            status,
            result: None,
            created_at: now,
            started_at: (status == SubtaskStatus::Running).then_some(now),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Identity used when comparing work across agents: the concrete agent id
    /// when known, else the agent type, else the subtask itself.
    pub fn agent_label(&self) -> String {
        self.agent_id
            .as_ref()
            .map(|a| a.0.clone())
            .or_else(|| self.agent_type.clone())
            .unwrap_or_else(|| format!("subtask:{}", self.id))
    }

    pub fn referenced_files(&self) -> &[String] {
        self.result.as_ref().map(|r| r.files.as_slice()).unwrap_or(&[])
    }

    pub fn transition(
        &mut self,
        to: SubtaskStatus,
        result: Option<SubtaskResult>,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, SubtaskTransitionError> {
        let from = self.status;
        if from.is_terminal() || from == to {
            return Ok(TransitionOutcome::Unchanged);
        }
        if to == SubtaskStatus::Pending {
            return Err(SubtaskTransitionError::Backwards { from, to });
        }

        self.status = to;
        if self.started_at.is_none() && (to == SubtaskStatus::Running || to.is_terminal()) {
            self.started_at = Some(at);
        }
        if to.is_terminal() {
            self.completed_at = Some(at);
        }
        if result.is_some() {
            self.result = result;
        }
        Ok(TransitionOutcome::Applied { from })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subtask() -> Subtask {
        Subtask::new(
            SessionId::from("s"),
            RequestId::new(),
            WaveId::new(),
            1,
            "implement endpoint",
            Some("backend-developer".into()),
            None,
            InitialStatus::Pending,
        )
    }

    #[test]
    fn test_result_merges_all_known_file_keys() {
        let result: SubtaskResult = serde_json::from_value(json!({
            "summary": "done",
            "files": ["src/a.rs"],
            "changed_files": ["src/b.rs", "src/a.rs"],
            "modified_files": ["src/c.rs"],
            "tests_passed": true
        }))
        .unwrap();

        assert_eq!(result.summary.as_deref(), Some("done"));
        assert_eq!(result.files, vec!["src/a.rs", "src/b.rs", "src/c.rs"]);
        assert_eq!(result.extra.get("tests_passed"), Some(&json!(true)));
    }

    #[test]
    fn test_plain_string_result_becomes_summary() {
        let result = SubtaskResult::from(json!("all good"));
        assert_eq!(result.summary.as_deref(), Some("all good"));
        assert!(result.files.is_empty());
    }

    #[test]
    fn test_timestamps_are_set_once() {
        let mut task = subtask();
        let first = Utc::now();
        task.transition(SubtaskStatus::Running, None, first).unwrap();
        task.transition(SubtaskStatus::Paused, None, Utc::now()).unwrap();
        task.transition(SubtaskStatus::Running, None, Utc::now()).unwrap();
        assert_eq!(task.started_at, Some(first));

        let done = Utc::now();
        task.transition(SubtaskStatus::Completed, None, done).unwrap();
        assert_eq!(
            task.transition(SubtaskStatus::Failed, None, Utc::now()).unwrap(),
            TransitionOutcome::Unchanged
        );
        assert_eq!(task.completed_at, Some(done));
        assert_eq!(task.status, SubtaskStatus::Completed);
    }

    #[test]
    fn test_cannot_return_to_pending() {
        let mut task = subtask();
        task.transition(SubtaskStatus::Running, None, Utc::now()).unwrap();
        assert!(task.transition(SubtaskStatus::Pending, None, Utc::now()).is_err());
    }

    #[test]
    fn test_only_open_statuses_are_initial() {
        assert_eq!(InitialStatus::try_from(SubtaskStatus::Running), Ok(InitialStatus::Running));
        assert_eq!(InitialStatus::try_from(SubtaskStatus::Completed), Err(SubtaskStatus::Completed));
        assert_eq!(InitialStatus::try_from(SubtaskStatus::Paused), Err(SubtaskStatus::Paused));

        let running = Subtask::new(
            SessionId::from("s"),
            RequestId::new(),
            WaveId::new(),
            1,
            "implement endpoint",
            None,
            None,
            InitialStatus::Running,
        );
        assert_eq!(running.status, SubtaskStatus::Running);
        assert!(running.started_at.is_some());
        assert!(subtask().started_at.is_none());
    }
}
