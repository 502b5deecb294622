// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Batch Aggregate
//!
//! A named submission of subtasks for one wave. The batch keeps its own
//! counters, independent of the wave's (a wave may span several batches),
//! and carries the [`Synthesis`] once it completes.

use crate::domain::conflict::Conflict;
use crate::domain::session::{RequestId, SessionId};
use crate::domain::subtask::{Subtask, SubtaskId, SubtaskStatus};
use crate::domain::tokens::estimate_tokens;
use crate::domain::wave::WaveId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(format!("unknown batch status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub session_id: SessionId,
    pub request_id: RequestId,
    pub wave_id: WaveId,
    pub wave_number: u32,
    pub name: String,
    pub status: BatchStatus,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub synthesis: Option<Synthesis>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn new(
        session_id: SessionId,
        request_id: RequestId,
        wave_id: WaveId,
        wave_number: u32,
        name: impl Into<String>,
        total_tasks: u32,
    ) -> Self {
        Self {
            id: BatchId::new(),
            session_id,
            request_id,
            wave_id,
            wave_number,
            name: name.into(),
            status: BatchStatus::Pending,
            total_tasks,
            completed_tasks: 0,
            failed_tasks: 0,
            synthesis: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_settled(&self) -> bool {
        self.total_tasks > 0 && self.completed_tasks + self.failed_tasks >= self.total_tasks
    }

    /// Count one subtask outcome. Refused once terminal or when the counters
    /// already cover every task.
    pub fn record_outcome(&mut self, failed: bool) -> bool {
        if self.is_terminal() || self.completed_tasks + self.failed_tasks >= self.total_tasks {
            return false;
        }
        if failed {
            self.failed_tasks += 1;
        } else {
            self.completed_tasks += 1;
        }
        true
    }

    /// Apply a synthesis and terminal status. Only the first call wins.
    pub fn finalize(&mut self, synthesis: Synthesis, at: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.completed_tasks = synthesis.stats.completed;
        self.failed_tasks = synthesis.stats.failed;
        self.status = if synthesis.stats.failed > 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        self.synthesis = Some(synthesis);
        self.completed_at = Some(at);
        true
    }
}

/// Per-subtask line of a synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDigest {
    pub subtask_id: SubtaskId,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    pub status: SubtaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisStats {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub unfinished: u32,
    pub conflict_count: u32,
    pub raw_chars: usize,
    pub synthesis_chars: usize,
}

/// Aggregated, conflict-annotated summary of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub summary: String,
    pub results: Vec<ResultDigest>,
    pub conflicts: Vec<Conflict>,
    pub files_changed: Vec<String>,
    pub next_wave_ready: bool,
    pub tokens_saved: u64,
    pub stats: SynthesisStats,
}

impl Synthesis {
    /// Build the synthesis for a batch from its subtasks and the conflicts
    /// already detected over them. Fails only if the synthesis cannot be
    /// serialized for its own size estimate.
    pub fn build(
        batch_name: &str,
        total_tasks: u32,
        subtasks: &[Subtask],
        conflicts: Vec<Conflict>,
    ) -> Result<Self, serde_json::Error> {
        let completed = subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .count() as u32;
        let failed = subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Failed)
            .count() as u32;
        let total = total_tasks.max(subtasks.len() as u32);

        let files_changed: Vec<String> = subtasks
            .iter()
            .flat_map(|s| s.referenced_files().iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let results: Vec<ResultDigest> = subtasks
            .iter()
            .map(|s| ResultDigest {
                subtask_id: s.id,
                agent: s.agent_label(),
                agent_type: s.agent_type.clone(),
                status: s.status,
                summary: s.result.as_ref().and_then(|r| r.summary.clone()),
                files: s.referenced_files().to_vec(),
                error: s.result.as_ref().and_then(|r| r.error.clone()),
            })
            .collect();

        let raw_chars = subtasks
            .iter()
            .filter_map(|s| s.result.as_ref())
            .map(|r| r.raw_len())
            .sum();

        let summary = format!(
            "Batch '{}': {}/{} completed, {} failed, {} conflict(s), {} file(s) changed",
            batch_name,
            completed,
            total,
            failed,
            conflicts.len(),
            files_changed.len()
        );

        let mut synthesis = Self {
            summary,
            results,
            next_wave_ready: failed == 0 && completed == total,
            stats: SynthesisStats {
                total,
                completed,
                failed,
                unfinished: total.saturating_sub(completed + failed),
                conflict_count: conflicts.len() as u32,
                raw_chars,
                synthesis_chars: 0,
            },
            conflicts,
            files_changed,
            tokens_saved: 0,
        };

        let synthesis_chars = serde_json::to_string(&synthesis)?.len();
        synthesis.stats.synthesis_chars = synthesis_chars;
        synthesis.tokens_saved = tokens_saved(raw_chars, synthesis_chars);
        Ok(synthesis)
    }
}

/// `max(0, round(raw/4) - round(synthesis/4))`
pub fn tokens_saved(raw_chars: usize, synthesis_chars: usize) -> u64 {
    let raw = estimate_tokens(raw_chars);
    let synthesized = estimate_tokens(synthesis_chars);
    raw.saturating_sub(synthesized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subtask::{InitialStatus, SubtaskResult};
    use serde_json::json;

    fn finished(status: SubtaskStatus, files: &[&str]) -> Subtask {
        let mut task = Subtask::new(
            SessionId::from("s"),
            RequestId::new(),
            WaveId::new(),
            1,
            "work",
            Some("backend-developer".into()),
            None,
            InitialStatus::Running,
        );
        let result = SubtaskResult::from(json!({ "summary": "x", "files": files }));
        task.transition(status, Some(result), Utc::now()).unwrap();
        task
    }

    #[test]
    fn test_tokens_saved_never_negative() {
        assert_eq!(tokens_saved(10, 4_000), 0);
        assert_eq!(tokens_saved(4_000, 400), 900);
    }

    #[test]
    fn test_synthesis_with_failure_is_not_ready() {
        let tasks = vec![
            finished(SubtaskStatus::Completed, &["a.rs"]),
            finished(SubtaskStatus::Completed, &["b.rs"]),
            finished(SubtaskStatus::Failed, &[]),
        ];
        let synthesis = Synthesis::build("b", 3, &tasks, vec![]).unwrap();
        assert!(!synthesis.next_wave_ready);
        assert!(synthesis.stats.synthesis_chars > 0);
        assert_eq!(
            synthesis.tokens_saved,
            tokens_saved(synthesis.stats.raw_chars, synthesis.stats.synthesis_chars)
        );
        assert_eq!(synthesis.stats.completed, 2);
        assert_eq!(synthesis.stats.failed, 1);
        assert_eq!(synthesis.files_changed, vec!["a.rs", "b.rs"]);

        let mut batch = Batch::new(SessionId::from("s"), RequestId::new(), WaveId::new(), 1, "b", 3);
        assert!(batch.finalize(synthesis.clone(), Utc::now()));
        assert_eq!(batch.status, BatchStatus::Failed);
        assert!(!batch.finalize(synthesis, Utc::now()));
    }

    #[test]
    fn test_record_outcome_never_exceeds_total() {
        let mut batch = Batch::new(SessionId::from("s"), RequestId::new(), WaveId::new(), 0, "b", 1);
        assert!(batch.record_outcome(false));
        assert!(!batch.record_outcome(true));
        assert!(batch.is_settled());
    }
}
