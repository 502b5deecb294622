// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Port through which the engine reaches the inter-agent messaging and
//! blocking layer without depending on it.

use crate::domain::agent::AgentId;
use crate::domain::lookup::DegradedLookupError;
use crate::domain::session::SessionId;
use crate::domain::snapshot::SnapshotId;
use crate::domain::subtask::Subtask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDigest {
    pub from: AgentId,
    pub topic: String,
    pub priority: u8,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingDigest {
    pub blocker: AgentId,
    pub blocked: AgentId,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
#[error("coordination failed: {0}")]
pub struct CoordinationError(pub String);

#[async_trait]
pub trait CoordinationPort: Send + Sync {
    /// Announce a finished subtask to the other agents.
    async fn broadcast_subtask_result(&self, subtask: &Subtask) -> Result<(), CoordinationError>;

    /// Unread, unexpired messages addressed to `agent` (direct or broadcast),
    /// without marking them read.
    async fn pending_messages(&self, agent: &AgentId) -> Result<Vec<MessageDigest>, DegradedLookupError>;

    /// Blocking relations in which `agent` takes part, either side.
    async fn blocking_for(&self, agent: &AgentId) -> Result<Vec<BlockingDigest>, DegradedLookupError>;

    /// Tell `agent` a snapshot was saved on its behalf and it should compact.
    async fn request_compaction(
        &self,
        agent: &AgentId,
        session: &SessionId,
        snapshot: SnapshotId,
    ) -> Result<(), CoordinationError>;
}

/// Port used when no messaging layer is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCoordination;

#[async_trait]
impl CoordinationPort for NoopCoordination {
    async fn broadcast_subtask_result(&self, _subtask: &Subtask) -> Result<(), CoordinationError> {
        Ok(())
    }

    async fn pending_messages(&self, _agent: &AgentId) -> Result<Vec<MessageDigest>, DegradedLookupError> {
        Ok(Vec::new())
    }

    async fn blocking_for(&self, _agent: &AgentId) -> Result<Vec<BlockingDigest>, DegradedLookupError> {
        Ok(Vec::new())
    }

    async fn request_compaction(
        &self,
        _agent: &AgentId,
        _session: &SessionId,
        _snapshot: SnapshotId,
    ) -> Result<(), CoordinationError> {
        Ok(())
    }
}
