// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::agent::AgentId;
use crate::domain::batch::{BatchId, BatchStatus};
use crate::domain::capacity::Zone;
use crate::domain::session::{RequestId, RequestStatus, SessionId};
use crate::domain::snapshot::{SnapshotId, SnapshotTrigger};
use crate::domain::subtask::{SubtaskId, SubtaskStatus};
use crate::domain::wave::{WaveId, WaveStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wave, batch, request and subtask lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    WaveStarted {
        wave_id: WaveId,
        session_id: SessionId,
        request_id: RequestId,
        wave_number: u32,
        started_at: DateTime<Utc>,
    },
    /// Emitted exactly once per wave, by whichever caller settled it.
    WaveTerminal {
        wave_id: WaveId,
        session_id: SessionId,
        request_id: RequestId,
        wave_number: u32,
        status: WaveStatus,
        total_tasks: u32,
        completed_tasks: u32,
        failed_tasks: u32,
        completed_at: DateTime<Utc>,
    },
    BatchCreated {
        batch_id: BatchId,
        session_id: SessionId,
        wave_number: u32,
        subtask_ids: Vec<SubtaskId>,
        created_at: DateTime<Utc>,
    },
    BatchCompleted {
        batch_id: BatchId,
        session_id: SessionId,
        wave_number: u32,
        status: BatchStatus,
        next_wave_ready: bool,
        conflict_count: usize,
        completed_at: DateTime<Utc>,
    },
    RequestCompleted {
        request_id: RequestId,
        session_id: SessionId,
        status: RequestStatus,
        completed_at: DateTime<Utc>,
    },
    SubtaskTransitioned {
        subtask_id: SubtaskId,
        session_id: SessionId,
        wave_number: u32,
        agent_id: Option<AgentId>,
        from: SubtaskStatus,
        to: SubtaskStatus,
        at: DateTime<Utc>,
    },
    SessionClosed {
        session_id: SessionId,
        orphans_closed: usize,
        closed_at: DateTime<Utc>,
    },
    SnapshotSaved {
        snapshot_id: SnapshotId,
        session_id: SessionId,
        trigger: SnapshotTrigger,
        saved_at: DateTime<Utc>,
    },
    SessionCompacted {
        session_id: SessionId,
        agent_id: AgentId,
        snapshot_id: Option<SnapshotId>,
        compacted_at: DateTime<Utc>,
    },
}

/// Backpressure events from the capacity controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CapacityEvent {
    /// Published when a report leaves the agent in orange or above.
    CapacityWarning {
        agent_id: AgentId,
        session_id: SessionId,
        zone: Zone,
        usage_percent: f64,
        current_usage: u64,
        max_capacity: u64,
        predicted_exhaustion_minutes: Option<f64>,
        at: DateTime<Utc>,
    },
    CapacityReset {
        agent_id: AgentId,
        usage_before: u64,
        usage_after: u64,
        compact_count: u32,
        at: DateTime<Utc>,
    },
}

/// Inter-agent coordination events relayed by the messaging and blocking
/// layer. `audience` lists the agents whose per-agent channel receives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinationEvent {
    MessagePublished {
        message_id: Uuid,
        from: AgentId,
        to: Option<AgentId>,
        topic: String,
        priority: u8,
        audience: Vec<AgentId>,
        published_at: DateTime<Utc>,
    },
    AgentBlocked {
        relation_id: Uuid,
        blocker: AgentId,
        blocked: AgentId,
        reason: String,
        at: DateTime<Utc>,
    },
    AgentUnblocked {
        relation_id: Uuid,
        blocker: AgentId,
        blocked: AgentId,
        at: DateTime<Utc>,
    },
}

impl CoordinationEvent {
    pub fn concerns(&self, agent: &AgentId) -> bool {
        match self {
            CoordinationEvent::MessagePublished { to, audience, .. } => {
                to.as_ref() == Some(agent) || audience.contains(agent)
            }
            CoordinationEvent::AgentBlocked { blocked, .. } => blocked == agent,
            CoordinationEvent::AgentUnblocked { blocked, .. } => blocked == agent,
        }
    }
}

impl CapacityEvent {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            CapacityEvent::CapacityWarning { agent_id, .. } => agent_id,
            CapacityEvent::CapacityReset { agent_id, .. } => agent_id,
        }
    }
}

impl OrchestrationEvent {
    pub fn concerns(&self, agent: &AgentId) -> bool {
        match self {
            OrchestrationEvent::SubtaskTransitioned { agent_id, .. } => agent_id.as_ref() == Some(agent),
            OrchestrationEvent::SessionCompacted { agent_id, .. } => agent_id == agent,
            _ => false,
        }
    }
}
