// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Compact Snapshots
//!
//! Append-only, point-in-time records of a session's working context. The
//! newest row for a session is authoritative when rendering a restore brief.

use crate::domain::agent::{AgentContext, AgentId};
use crate::domain::session::{RequestId, SessionId};
use crate::domain::subtask::{Subtask, SubtaskId, SubtaskStatus};
use crate::domain::wave::{Wave, WaveStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    Manual,
    Auto,
    Proactive,
}

impl SnapshotTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotTrigger::Manual => "manual",
            SnapshotTrigger::Auto => "auto",
            SnapshotTrigger::Proactive => "proactive",
        }
    }
}

impl fmt::Display for SnapshotTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SnapshotTrigger::Manual),
            "auto" => Ok(SnapshotTrigger::Auto),
            "proactive" => Ok(SnapshotTrigger::Proactive),
            other => Err(format!("unknown snapshot trigger '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTaskEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<SubtaskId>,
    pub description: String,
    #[serde(default = "pending")]
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_number: Option<u32>,
}

fn pending() -> SubtaskStatus {
    SubtaskStatus::Pending
}

impl From<&Subtask> for ActiveTaskEntry {
    fn from(subtask: &Subtask) -> Self {
        Self {
            subtask_id: Some(subtask.id),
            description: subtask.description.clone(),
            status: subtask.status,
            agent_type: subtask.agent_type.clone(),
            agent_id: subtask.agent_id.clone(),
            wave_number: Some(subtask.wave_number),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStateEntry {
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_touched: Vec<String>,
}

impl From<&AgentContext> for AgentStateEntry {
    fn from(context: &AgentContext) -> Self {
        Self {
            agent_id: context.agent_id.clone(),
            agent_type: context.agent_type.clone(),
            status: context.status.clone(),
            summary: context.last_summary.clone(),
            files_touched: context.files_touched.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveStateEntry {
    pub wave_number: u32,
    pub status: WaveStatus,
    #[serde(default)]
    pub total_tasks: u32,
    #[serde(default)]
    pub completed_tasks: u32,
    #[serde(default)]
    pub failed_tasks: u32,
}

impl From<&Wave> for WaveStateEntry {
    fn from(wave: &Wave) -> Self {
        Self {
            wave_number: wave.wave_number,
            status: wave.status,
            total_tasks: wave.total_tasks,
            completed_tasks: wave.completed_tasks,
            failed_tasks: wave.failed_tasks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub session_id: SessionId,
    pub request_id: Option<RequestId>,
    pub trigger: SnapshotTrigger,
    pub schema_version: u32,
    pub context_summary: Option<String>,
    pub active_tasks: Vec<ActiveTaskEntry>,
    pub modified_files: Vec<String>,
    pub key_decisions: Vec<String>,
    pub agent_states: Vec<AgentStateEntry>,
    pub wave_state: Option<WaveStateEntry>,
    pub created_at: DateTime<Utc>,
}

/// Everything a caller provides when saving a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotContent {
    #[serde(default)]
    pub context_summary: Option<String>,
    #[serde(default)]
    pub active_tasks: Vec<ActiveTaskEntry>,
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    #[serde(default)]
    pub agent_states: Vec<AgentStateEntry>,
    #[serde(default)]
    pub wave_state: Option<WaveStateEntry>,
}

impl Snapshot {
    pub fn new(
        session_id: SessionId,
        request_id: Option<RequestId>,
        trigger: SnapshotTrigger,
        content: SnapshotContent,
    ) -> Self {
        Self {
            id: SnapshotId::new(),
            session_id,
            request_id,
            trigger,
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            context_summary: content.context_summary,
            active_tasks: content.active_tasks,
            modified_files: content.modified_files,
            key_decisions: content.key_decisions,
            agent_states: content.agent_states,
            wave_state: content.wave_state,
            created_at: Utc::now(),
        }
    }

    pub fn contains_subtask(&self, id: SubtaskId) -> bool {
        self.active_tasks.iter().any(|t| t.subtask_id == Some(id))
    }
}

/// Compaction bookkeeping for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionStatus {
    pub session_id: SessionId,
    pub compacted_at: Option<DateTime<Utc>>,
    pub compact_count: u32,
    pub snapshot_count: u64,
    pub latest_snapshot_at: Option<DateTime<Utc>>,
    pub latest_trigger: Option<SnapshotTrigger>,
}
