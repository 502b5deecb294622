// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Blocking Relations
//!
//! A ledger of "agent X is waiting on agent Y". Nothing here suspends
//! anyone: agents poll or subscribe to learn whether they are blocked.

use chrono::{DateTime, Utc};
use conductor_core::domain::agent::AgentId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `blocker` holds up `blocked`. Unique per pair; never `blocker == blocked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingRelation {
    pub id: Uuid,
    pub blocker: AgentId,
    pub blocked: AgentId,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlockingRelation {
    pub fn new(blocker: AgentId, blocked: AgentId, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            blocker,
            blocked,
            reason: reason.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Both directions of an agent's blocking state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockingStatus {
    pub agent_id: AgentId,
    /// Relations where this agent is the one waiting.
    pub blocked_by: Vec<BlockingRelation>,
    /// Relations where this agent holds someone else up.
    pub blocking: Vec<BlockingRelation>,
    pub blocked_by_count: usize,
    pub blocking_count: usize,
    pub is_blocked: bool,
}

impl BlockingStatus {
    pub fn new(agent_id: AgentId, blocked_by: Vec<BlockingRelation>, blocking: Vec<BlockingRelation>) -> Self {
        Self {
            agent_id,
            blocked_by_count: blocked_by.len(),
            blocking_count: blocking.len(),
            is_blocked: !blocked_by.is_empty(),
            blocked_by,
            blocking,
        }
    }
}

/// Result of an upsert: whether the pair was new or only its reason moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockUpsert {
    pub relation: BlockingRelation,
    pub created: bool,
}
