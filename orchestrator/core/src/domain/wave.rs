// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Wave Aggregate
//!
//! A wave is an ordered stage of parallel subtask work inside a request,
//! identified by `(request, wave_number)`.
//!
//! ```text
//! pending ──▶ running ──▶ completed
//!                    └──▶ failed
//! ```
//!
//! # Invariants
//!
//! - `completed_tasks + failed_tasks <= total_tasks` at all times.
//! - The status becomes terminal exactly once, when the settled count
//!   reaches a non-zero `total_tasks`; terminal statuses are absorbing.

use crate::domain::session::{RequestId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaveId(pub Uuid);

impl WaveId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WaveId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WaveStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WaveStatus::Completed | WaveStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WaveStatus::Pending => "pending",
            WaveStatus::Running => "running",
            WaveStatus::Completed => "completed",
            WaveStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WaveStatus::Pending),
            "running" => Ok(WaveStatus::Running),
            "completed" => Ok(WaveStatus::Completed),
            "failed" => Ok(WaveStatus::Failed),
            other => Err(format!("unknown wave status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wave {
    pub id: WaveId,
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub wave_number: u32,
    pub status: WaveStatus,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Wave {
    pub fn new(request_id: RequestId, session_id: SessionId, wave_number: u32) -> Self {
        Self {
            id: WaveId::new(),
            request_id,
            session_id,
            wave_number,
            status: WaveStatus::Pending,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Completed plus failed.
    pub fn settled_tasks(&self) -> u32 {
        self.completed_tasks + self.failed_tasks
    }

    pub fn is_settled(&self) -> bool {
        self.total_tasks > 0 && self.settled_tasks() == self.total_tasks
    }

    /// `pending -> running`. Returns whether the status changed.
    pub fn start(&mut self, at: DateTime<Utc>) -> bool {
        if self.status != WaveStatus::Pending {
            return false;
        }
        self.status = WaveStatus::Running;
        self.started_at = Some(at);
        true
    }

    /// Grow the task count. Terminal waves are immutable.
    pub fn add_tasks(&mut self, count: u32) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.total_tasks += count;
        true
    }

    /// Count one settled task. Refused once every declared task is settled,
    /// which is what keeps the counter invariant under repeated calls.
    pub fn record_outcome(&mut self, failed: bool) -> bool {
        if self.is_terminal() || self.settled_tasks() >= self.total_tasks {
            return false;
        }
        if failed {
            self.failed_tasks += 1;
        } else {
            self.completed_tasks += 1;
        }
        true
    }

    /// Flip to the terminal status if every task is settled. Only the first
    /// caller observes `Some`.
    pub fn try_finalize(&mut self, at: DateTime<Utc>) -> Option<WaveStatus> {
        if self.is_terminal() || !self.is_settled() {
            return None;
        }
        self.status = if self.failed_tasks > 0 {
            WaveStatus::Failed
        } else {
            WaveStatus::Completed
        };
        if self.started_at.is_none() {
            self.started_at = Some(at);
        }
        self.completed_at = Some(at);
        Some(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave_with_tasks(total: u32) -> Wave {
        let mut wave = Wave::new(RequestId::new(), SessionId::from("s"), 1);
        wave.add_tasks(total);
        wave
    }

    #[test]
    fn test_counters_never_exceed_total() {
        let mut wave = wave_with_tasks(2);
        assert!(wave.record_outcome(false));
        assert!(wave.record_outcome(true));
        assert!(!wave.record_outcome(false));
        assert_eq!(wave.settled_tasks(), 2);
    }

    #[test]
    fn test_finalize_happens_once_and_prefers_failed() {
        let mut wave = wave_with_tasks(2);
        wave.record_outcome(false);
        assert_eq!(wave.try_finalize(Utc::now()), None);
        wave.record_outcome(true);
        assert_eq!(wave.try_finalize(Utc::now()), Some(WaveStatus::Failed));
        assert_eq!(wave.try_finalize(Utc::now()), None);
        assert_eq!(wave.status, WaveStatus::Failed);
    }

    #[test]
    fn test_empty_wave_never_finalizes() {
        let mut wave = wave_with_tasks(0);
        assert!(!wave.record_outcome(false));
        assert_eq!(wave.try_finalize(Utc::now()), None);
    }

    #[test]
    fn test_terminal_wave_rejects_new_tasks() {
        let mut wave = wave_with_tasks(1);
        wave.record_outcome(false);
        wave.try_finalize(Utc::now());
        assert!(!wave.add_tasks(3));
        assert_eq!(wave.total_tasks, 1);
    }
}
