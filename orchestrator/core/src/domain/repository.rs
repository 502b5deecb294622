// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts, one per aggregate, defined in the domain layer and
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `SessionRepository` | `Session` | `InMemoryStore`, `PostgresStore` |
//! | `RequestRepository` | `Request` | `InMemoryStore`, `PostgresStore` |
//! | `WaveRepository` | `Wave` | `InMemoryStore`, `PostgresStore` |
//! | `BatchRepository` | `Batch` | `InMemoryStore`, `PostgresStore` |
//! | `SubtaskRepository` | `Subtask` | `InMemoryStore`, `PostgresStore` |
//! | `CapacityRepository` | `AgentCapacity` | `InMemoryStore`, `PostgresStore` |
//! | `SnapshotRepository` | `Snapshot` | `InMemoryStore`, `PostgresStore` |
//! | `AgentContextRepository` | `AgentContext` | `InMemoryStore`, `PostgresStore` |
//! | `CompactionLedger` | session + capacity | `InMemoryStore`, `PostgresStore` |
//!
//! ## Atomicity
//!
//! Counter changes (wave and batch outcomes, capacity usage) are conditional
//! updates performed by the store; callers never read, modify and write back.
//! Methods returning `Option` for a transition yield `Some` only to the
//! caller whose call actually applied it.

use crate::domain::agent::{AgentContext, AgentId};
use crate::domain::batch::{Batch, BatchId, Synthesis};
use crate::domain::capacity::{AgentCapacity, CapacityPolicy, TokenLedgerEntry, TokenUsage};
use crate::domain::session::{Request, RequestId, Session, SessionId};
use crate::domain::snapshot::Snapshot;
use crate::domain::subtask::{Subtask, SubtaskId, SubtaskResult, SubtaskStatus, TransitionOutcome};
use crate::domain::wave::{Wave, WaveId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get_or_create(&self, id: &SessionId) -> Result<Session, RepositoryError>;

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Insert a request, creating its session if needed.
    async fn create(&self, request: &Request) -> Result<(), RepositoryError>;

    async fn find(&self, id: RequestId) -> Result<Option<Request>, RepositoryError>;

    /// Newest request of the session.
    async fn current_for_session(&self, session: &SessionId) -> Result<Option<Request>, RepositoryError>;

    /// Derive the terminal status once every wave of the request is terminal
    /// (`failed` if any wave failed). `Some` only for the transitioning call.
    async fn finish_if_settled(&self, id: RequestId, at: DateTime<Utc>) -> Result<Option<Request>, RepositoryError>;
}

#[async_trait]
pub trait WaveRepository: Send + Sync {
    /// Idempotent on `(request, wave_number)`.
    async fn get_or_create(
        &self,
        request: RequestId,
        session: &SessionId,
        wave_number: u32,
    ) -> Result<Wave, RepositoryError>;

    async fn find(&self, request: RequestId, wave_number: u32) -> Result<Option<Wave>, RepositoryError>;

    async fn find_by_id(&self, id: WaveId) -> Result<Option<Wave>, RepositoryError>;

    /// Waves of a request ordered by `wave_number`.
    async fn list_for_request(&self, request: RequestId) -> Result<Vec<Wave>, RepositoryError>;

    /// `pending -> running`. `None` if the wave was not pending.
    async fn mark_running(&self, id: WaveId, at: DateTime<Utc>) -> Result<Option<Wave>, RepositoryError>;

    /// Count one subtask outcome. `None` when the wave is terminal or its
    /// counters already cover `total_tasks`.
    async fn increment_outcome(&self, id: WaveId, failed: bool) -> Result<Option<Wave>, RepositoryError>;

    /// Set the terminal status once settled. `Some` only for the first caller.
    async fn finalize_if_settled(&self, id: WaveId, at: DateTime<Utc>) -> Result<Option<Wave>, RepositoryError>;
}

/// Everything written by one batch submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedBatch {
    pub batch: Batch,
    pub wave: Wave,
    pub subtasks: Vec<Subtask>,
}

#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// Atomically resolve the wave for `(request, wave_number)`, raise its
    /// `total_tasks`, insert the batch and every subtask. The store assigns
    /// the wave id and batch id onto the subtasks. A terminal wave is a
    /// `Conflict`.
    async fn submit(
        &self,
        batch: Batch,
        subtasks: Vec<Subtask>,
    ) -> Result<SubmittedBatch, RepositoryError>;

    async fn find(&self, id: BatchId) -> Result<Option<Batch>, RepositoryError>;

    async fn increment_outcome(&self, id: BatchId, failed: bool) -> Result<Option<Batch>, RepositoryError>;

    /// Store the synthesis and terminal status. `Some` only for the first caller.
    async fn finalize(
        &self,
        id: BatchId,
        synthesis: &Synthesis,
        at: DateTime<Utc>,
    ) -> Result<Option<Batch>, RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub subtask: Subtask,
    pub outcome: TransitionOutcome,
}

#[async_trait]
pub trait SubtaskRepository: Send + Sync {
    /// Insert a subtask and raise its wave's `total_tasks` in one step.
    async fn create_in_wave(&self, subtask: &Subtask) -> Result<Wave, RepositoryError>;

    async fn find(&self, id: SubtaskId) -> Result<Option<Subtask>, RepositoryError>;

    /// Serialized status change; see [`Subtask::transition`].
    async fn transition(
        &self,
        id: SubtaskId,
        to: SubtaskStatus,
        result: Option<SubtaskResult>,
        at: DateTime<Utc>,
    ) -> Result<TransitionRecord, RepositoryError>;

    /// Ordered by priority desc, then creation time asc.
    async fn list_for_batch(&self, batch: BatchId) -> Result<Vec<Subtask>, RepositoryError>;

    async fn list_for_wave(&self, wave: WaveId) -> Result<Vec<Subtask>, RepositoryError>;

    /// Non-terminal subtasks of a session, oldest first.
    async fn list_active_for_session(&self, session: &SessionId) -> Result<Vec<Subtask>, RepositoryError>;

    /// Orphan sweep: force-complete every non-terminal subtask of the session
    /// with the session-ended result and mark the session ended.
    async fn close_session(&self, session: &SessionId, at: DateTime<Utc>) -> Result<Vec<Subtask>, RepositoryError>;
}

#[async_trait]
pub trait CapacityRepository: Send + Sync {
    /// Lazily create the agent's row, credit `tokens` under the row lock and
    /// append the ledger entry.
    async fn record_usage(
        &self,
        usage: &TokenUsage,
        tokens: u64,
        policy: &CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<(AgentCapacity, TokenLedgerEntry), RepositoryError>;

    async fn find(&self, agent: &AgentId) -> Result<Option<AgentCapacity>, RepositoryError>;

    /// Apply a compaction. Returns usage before the reset and the new row.
    async fn reset(
        &self,
        agent: &AgentId,
        policy: &CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<Option<(u64, AgentCapacity)>, RepositoryError>;

    /// Most recent ledger entries, newest first.
    async fn ledger(&self, agent: &AgentId, limit: usize) -> Result<Vec<TokenLedgerEntry>, RepositoryError>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Append the snapshot and stamp the parent request's metadata.
    async fn append(&self, snapshot: &Snapshot) -> Result<(), RepositoryError>;

    async fn latest(&self, session: &SessionId) -> Result<Option<Snapshot>, RepositoryError>;

    async fn count(&self, session: &SessionId) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait AgentContextRepository: Send + Sync {
    async fn upsert(&self, context: &AgentContext) -> Result<(), RepositoryError>;

    async fn find(&self, session: &SessionId, agent: &AgentId) -> Result<Option<AgentContext>, RepositoryError>;

    async fn list_for_session(&self, session: &SessionId) -> Result<Vec<AgentContext>, RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct CompactionRecord {
    pub session: Session,
    /// Usage before reset and the reset row; `None` for an untracked agent.
    pub capacity: Option<(u64, AgentCapacity)>,
}

/// Cross-aggregate write that keeps "session compacted" and "agent capacity
/// reset" from diverging.
#[async_trait]
pub trait CompactionLedger: Send + Sync {
    async fn record_compaction(
        &self,
        session: &SessionId,
        agent: &AgentId,
        policy: &CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<CompactionRecord, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
