// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory implementation of every store port.
//!
//! All tables live behind one `RwLock` so cross-table operations (batch
//! submission, orphan sweep, compaction) are atomic the same way a database
//! transaction would make them.

use crate::domain::agent::{AgentContext, AgentId};
use crate::domain::batch::{Batch, BatchId, Synthesis};
use crate::domain::capacity::{AgentCapacity, CapacityPolicy, TokenLedgerEntry, TokenUsage};
use crate::domain::repository::{
    AgentContextRepository, BatchRepository, CapacityRepository, CompactionLedger, CompactionRecord,
    RepositoryError, RequestRepository, SessionRepository, SnapshotRepository, SubmittedBatch,
    SubtaskRepository, TransitionRecord, WaveRepository,
};
use crate::domain::session::{Request, RequestId, RequestStatus, Session, SessionId};
use crate::domain::snapshot::Snapshot;
use crate::domain::subtask::{Subtask, SubtaskId, SubtaskResult, SubtaskStatus};
use crate::domain::wave::{Wave, WaveId, WaveStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, Session>,
    /// Insertion order doubles as creation order.
    requests: Vec<Request>,
    waves: HashMap<WaveId, Wave>,
    batches: HashMap<BatchId, Batch>,
    subtasks: Vec<Subtask>,
    capacities: HashMap<AgentId, AgentCapacity>,
    ledger: Vec<TokenLedgerEntry>,
    snapshots: Vec<Snapshot>,
    contexts: HashMap<(SessionId, AgentId), AgentContext>,
}

impl Tables {
    fn session_mut(&mut self, id: &SessionId) -> &mut Session {
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id.clone()))
    }

    fn wave_for(&mut self, request: RequestId, session: &SessionId, wave_number: u32) -> &mut Wave {
        let id = self
            .waves
            .values()
            .find(|w| w.request_id == request && w.wave_number == wave_number)
            .map(|w| w.id)
            .unwrap_or_default();
        self.waves.entry(id).or_insert_with(|| {
            let mut wave = Wave::new(request, session.clone(), wave_number);
            wave.id = id;
            wave
        })
    }

    fn subtask_mut(&mut self, id: SubtaskId) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }
}

/// Thread-safe in-memory store used by tests and `storage.backend: in_memory`.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn get_or_create(&self, id: &SessionId) -> Result<Session, RepositoryError> {
        let mut tables = self.tables.write();
        Ok(tables.session_mut(id).clone())
    }

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        Ok(self.tables.read().sessions.get(id).cloned())
    }
}

#[async_trait]
impl RequestRepository for InMemoryStore {
    async fn create(&self, request: &Request) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        tables.session_mut(&request.session_id);
        if tables.requests.iter().any(|r| r.id == request.id) {
            return Err(RepositoryError::Conflict(format!("request {} already exists", request.id)));
        }
        tables.requests.push(request.clone());
        Ok(())
    }

    async fn find(&self, id: RequestId) -> Result<Option<Request>, RepositoryError> {
        Ok(self.tables.read().requests.iter().find(|r| r.id == id).cloned())
    }

    async fn current_for_session(&self, session: &SessionId) -> Result<Option<Request>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .requests
            .iter()
            .rev()
            .find(|r| &r.session_id == session)
            .cloned())
    }

    async fn finish_if_settled(&self, id: RequestId, at: DateTime<Utc>) -> Result<Option<Request>, RepositoryError> {
        let mut tables = self.tables.write();
        let waves: Vec<&Wave> = tables.waves.values().filter(|w| w.request_id == id).collect();
        if waves.is_empty() || !waves.iter().all(|w| w.is_terminal()) {
            return Ok(None);
        }
        let status = if waves.iter().any(|w| w.status == WaveStatus::Failed) {
            RequestStatus::Failed
        } else {
            RequestStatus::Completed
        };
        let request = tables
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("request {id}")))?;
        Ok(request.finish(status, at).then(|| request.clone()))
    }
}

#[async_trait]
impl WaveRepository for InMemoryStore {
    async fn get_or_create(
        &self,
        request: RequestId,
        session: &SessionId,
        wave_number: u32,
    ) -> Result<Wave, RepositoryError> {
        let mut tables = self.tables.write();
        Ok(tables.wave_for(request, session, wave_number).clone())
    }

    async fn find(&self, request: RequestId, wave_number: u32) -> Result<Option<Wave>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .waves
            .values()
            .find(|w| w.request_id == request && w.wave_number == wave_number)
            .cloned())
    }

    async fn find_by_id(&self, id: WaveId) -> Result<Option<Wave>, RepositoryError> {
        Ok(self.tables.read().waves.get(&id).cloned())
    }

    async fn list_for_request(&self, request: RequestId) -> Result<Vec<Wave>, RepositoryError> {
        let mut waves: Vec<Wave> = self
            .tables
            .read()
            .waves
            .values()
            .filter(|w| w.request_id == request)
            .cloned()
            .collect();
        waves.sort_by_key(|w| w.wave_number);
        Ok(waves)
    }

    async fn mark_running(&self, id: WaveId, at: DateTime<Utc>) -> Result<Option<Wave>, RepositoryError> {
        let mut tables = self.tables.write();
        let wave = tables
            .waves
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("wave {id}")))?;
        Ok(wave.start(at).then(|| wave.clone()))
    }

    async fn increment_outcome(&self, id: WaveId, failed: bool) -> Result<Option<Wave>, RepositoryError> {
        let mut tables = self.tables.write();
        let wave = tables
            .waves
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("wave {id}")))?;
        Ok(wave.record_outcome(failed).then(|| wave.clone()))
    }

    async fn finalize_if_settled(&self, id: WaveId, at: DateTime<Utc>) -> Result<Option<Wave>, RepositoryError> {
        let mut tables = self.tables.write();
        let wave = tables
            .waves
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("wave {id}")))?;
        Ok(wave.try_finalize(at).map(|_| wave.clone()))
    }
}

#[async_trait]
impl BatchRepository for InMemoryStore {
    async fn submit(&self, mut batch: Batch, mut subtasks: Vec<Subtask>) -> Result<SubmittedBatch, RepositoryError> {
        let mut tables = self.tables.write();
        tables.session_mut(&batch.session_id);
        if !tables.requests.iter().any(|r| r.id == batch.request_id) {
            return Err(RepositoryError::NotFound(format!("request {}", batch.request_id)));
        }

        let wave = tables.wave_for(batch.request_id, &batch.session_id, batch.wave_number);
        if !wave.add_tasks(subtasks.len() as u32) {
            return Err(RepositoryError::Conflict(format!(
                "wave {} is already {}",
                wave.wave_number, wave.status
            )));
        }
        let wave = wave.clone();

        batch.wave_id = wave.id;
        batch.total_tasks = subtasks.len() as u32;
        for subtask in &mut subtasks {
            subtask.wave_id = wave.id;
            subtask.wave_number = wave.wave_number;
            subtask.batch_id = Some(batch.id);
        }

        tables.batches.insert(batch.id, batch.clone());
        tables.subtasks.extend(subtasks.iter().cloned());
        Ok(SubmittedBatch { batch, wave, subtasks })
    }

    async fn find(&self, id: BatchId) -> Result<Option<Batch>, RepositoryError> {
        Ok(self.tables.read().batches.get(&id).cloned())
    }

    async fn increment_outcome(&self, id: BatchId, failed: bool) -> Result<Option<Batch>, RepositoryError> {
        let mut tables = self.tables.write();
        let batch = tables
            .batches
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("batch {id}")))?;
        Ok(batch.record_outcome(failed).then(|| batch.clone()))
    }

    async fn finalize(
        &self,
        id: BatchId,
        synthesis: &Synthesis,
        at: DateTime<Utc>,
    ) -> Result<Option<Batch>, RepositoryError> {
        let mut tables = self.tables.write();
        let batch = tables
            .batches
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("batch {id}")))?;
        Ok(batch.finalize(synthesis.clone(), at).then(|| batch.clone()))
    }
}

#[async_trait]
impl SubtaskRepository for InMemoryStore {
    async fn create_in_wave(&self, subtask: &Subtask) -> Result<Wave, RepositoryError> {
        let mut tables = self.tables.write();
        let wave = tables
            .waves
            .get_mut(&subtask.wave_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("wave {}", subtask.wave_id)))?;
        if !wave.add_tasks(1) {
            return Err(RepositoryError::Conflict(format!(
                "wave {} is already {}",
                wave.wave_number, wave.status
            )));
        }
        let wave = wave.clone();
        tables.subtasks.push(subtask.clone());
        Ok(wave)
    }

    async fn find(&self, id: SubtaskId) -> Result<Option<Subtask>, RepositoryError> {
        Ok(self.tables.read().subtasks.iter().find(|s| s.id == id).cloned())
    }

    async fn transition(
        &self,
        id: SubtaskId,
        to: SubtaskStatus,
        result: Option<SubtaskResult>,
        at: DateTime<Utc>,
    ) -> Result<TransitionRecord, RepositoryError> {
        let mut tables = self.tables.write();
        let subtask = tables
            .subtask_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("subtask {id}")))?;
        let outcome = subtask
            .transition(to, result, at)
            .map_err(|e| RepositoryError::Conflict(e.to_string()))?;
        Ok(TransitionRecord {
            subtask: subtask.clone(),
            outcome,
        })
    }

    async fn list_for_batch(&self, batch: BatchId) -> Result<Vec<Subtask>, RepositoryError> {
        let mut subtasks: Vec<Subtask> = self
            .tables
            .read()
            .subtasks
            .iter()
            .filter(|s| s.batch_id == Some(batch))
            .cloned()
            .collect();
        // stable sort keeps insertion order for equal timestamps
        subtasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(subtasks)
    }

    async fn list_for_wave(&self, wave: WaveId) -> Result<Vec<Subtask>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .subtasks
            .iter()
            .filter(|s| s.wave_id == wave)
            .cloned()
            .collect())
    }

    async fn list_active_for_session(&self, session: &SessionId) -> Result<Vec<Subtask>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .subtasks
            .iter()
            .filter(|s| &s.session_id == session && !s.is_terminal())
            .cloned()
            .collect())
    }

    async fn close_session(&self, session: &SessionId, at: DateTime<Utc>) -> Result<Vec<Subtask>, RepositoryError> {
        let mut tables = self.tables.write();
        let mut closed = Vec::new();
        for subtask in tables
            .subtasks
            .iter_mut()
            .filter(|s| &s.session_id == session && !s.is_terminal())
        {
            subtask
                .transition(SubtaskStatus::Completed, Some(SubtaskResult::session_ended()), at)
                .map_err(|e| RepositoryError::Conflict(e.to_string()))?;
            closed.push(subtask.clone());
        }
        tables.session_mut(session).end(at);
        Ok(closed)
    }
}

#[async_trait]
impl CapacityRepository for InMemoryStore {
    async fn record_usage(
        &self,
        usage: &TokenUsage,
        tokens: u64,
        policy: &CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<(AgentCapacity, TokenLedgerEntry), RepositoryError> {
        let mut tables = self.tables.write();
        let capacity = tables
            .capacities
            .entry(usage.agent_id.clone())
            .or_insert_with(|| AgentCapacity::new(usage.agent_id.clone(), Some(usage.session_id.clone()), policy));
        capacity.session_id = Some(usage.session_id.clone());
        capacity.record_usage(tokens, policy, at);
        let capacity = capacity.clone();

        let entry = TokenLedgerEntry {
            id: Uuid::new_v4(),
            agent_id: usage.agent_id.clone(),
            session_id: usage.session_id.clone(),
            tool_name: usage.tool_name.clone(),
            input_size: usage.input_size,
            output_size: usage.output_size,
            tokens,
            usage_after: capacity.current_usage,
            zone_after: capacity.zone,
            recorded_at: at,
        };
        tables.ledger.push(entry.clone());
        Ok((capacity, entry))
    }

    async fn find(&self, agent: &AgentId) -> Result<Option<AgentCapacity>, RepositoryError> {
        Ok(self.tables.read().capacities.get(agent).cloned())
    }

    async fn reset(
        &self,
        agent: &AgentId,
        policy: &CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<Option<(u64, AgentCapacity)>, RepositoryError> {
        let mut tables = self.tables.write();
        Ok(tables.capacities.get_mut(agent).map(|capacity| {
            let before = capacity.current_usage;
            capacity.apply_compaction(policy, at);
            (before, capacity.clone())
        }))
    }

    async fn ledger(&self, agent: &AgentId, limit: usize) -> Result<Vec<TokenLedgerEntry>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .ledger
            .iter()
            .rev()
            .filter(|e| &e.agent_id == agent)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryStore {
    async fn append(&self, snapshot: &Snapshot) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        tables.session_mut(&snapshot.session_id);
        if let Some(request_id) = snapshot.request_id {
            if let Some(request) = tables.requests.iter_mut().find(|r| r.id == request_id) {
                request.metadata.last_snapshot_at = Some(snapshot.created_at);
                request.metadata.last_snapshot_trigger = Some(snapshot.trigger.to_string());
            }
        }
        tables.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn latest(&self, session: &SessionId) -> Result<Option<Snapshot>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .snapshots
            .iter()
            .rev()
            .find(|s| &s.session_id == session)
            .cloned())
    }

    async fn count(&self, session: &SessionId) -> Result<u64, RepositoryError> {
        Ok(self
            .tables
            .read()
            .snapshots
            .iter()
            .filter(|s| &s.session_id == session)
            .count() as u64)
    }
}

#[async_trait]
impl AgentContextRepository for InMemoryStore {
    async fn upsert(&self, context: &AgentContext) -> Result<(), RepositoryError> {
        self.tables
            .write()
            .contexts
            .insert((context.session_id.clone(), context.agent_id.clone()), context.clone());
        Ok(())
    }

    async fn find(&self, session: &SessionId, agent: &AgentId) -> Result<Option<AgentContext>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .contexts
            .get(&(session.clone(), agent.clone()))
            .cloned())
    }

    async fn list_for_session(&self, session: &SessionId) -> Result<Vec<AgentContext>, RepositoryError> {
        let mut contexts: Vec<AgentContext> = self
            .tables
            .read()
            .contexts
            .values()
            .filter(|c| &c.session_id == session)
            .cloned()
            .collect();
        contexts.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(contexts)
    }
}

#[async_trait]
impl CompactionLedger for InMemoryStore {
    async fn record_compaction(
        &self,
        session: &SessionId,
        agent: &AgentId,
        policy: &CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<CompactionRecord, RepositoryError> {
        let mut tables = self.tables.write();
        let session_row = tables.session_mut(session);
        session_row.mark_compacted(at);
        let session_row = session_row.clone();
        let capacity = tables.capacities.get_mut(agent).map(|capacity| {
            let before = capacity.current_usage;
            capacity.apply_compaction(policy, at);
            (before, capacity.clone())
        });
        Ok(CompactionRecord {
            session: session_row,
            capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subtask::InitialStatus;

    async fn seeded() -> (InMemoryStore, Request) {
        let store = InMemoryStore::new();
        let request = Request::new(SessionId::from("s1"), None);
        RequestRepository::create(&store, &request).await.unwrap();
        (store, request)
    }

    #[tokio::test]
    async fn test_wave_get_or_create_is_idempotent() {
        let (store, request) = seeded().await;
        let a = WaveRepository::get_or_create(&store, request.id, &request.session_id, 1).await.unwrap();
        let b = WaveRepository::get_or_create(&store, request.id, &request.session_id, 1).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.list_for_request(request.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_terminal_wave_without_partial_writes() {
        let (store, request) = seeded().await;
        let wave = WaveRepository::get_or_create(&store, request.id, &request.session_id, 0).await.unwrap();
        let task = Subtask::new(
            request.session_id.clone(),
            request.id,
            wave.id,
            0,
            "only",
            None,
            None,
            InitialStatus::Pending,
        );
        store.create_in_wave(&task).await.unwrap();
        WaveRepository::increment_outcome(&store, wave.id, false).await.unwrap();
        store.finalize_if_settled(wave.id, Utc::now()).await.unwrap().unwrap();

        let batch = Batch::new(request.session_id.clone(), request.id, WaveId::new(), 0, "late", 1);
        let late = Subtask::new(
            request.session_id.clone(),
            request.id,
            WaveId::new(),
            0,
            "late",
            None,
            None,
            InitialStatus::Pending,
        );
        let err = store.submit(batch.clone(), vec![late]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert!(BatchRepository::find(&store, batch.id).await.unwrap().is_none());
        assert_eq!(store.list_for_wave(wave.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_session_sweeps_only_open_subtasks() {
        let (store, request) = seeded().await;
        let wave = WaveRepository::get_or_create(&store, request.id, &request.session_id, 0).await.unwrap();
        let open = Subtask::new(request.session_id.clone(), request.id, wave.id, 0, "open", None, None, InitialStatus::Running);
        let done = Subtask::new(request.session_id.clone(), request.id, wave.id, 0, "done", None, None, InitialStatus::Running);
        store.create_in_wave(&open).await.unwrap();
        store.create_in_wave(&done).await.unwrap();
        store
            .transition(done.id, SubtaskStatus::Failed, Some(SubtaskResult::failure("x")), Utc::now())
            .await
            .unwrap();

        let closed = store.close_session(&request.session_id, Utc::now()).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, open.id);
        assert_eq!(closed[0].result.as_ref().unwrap().extra.get("session_ended"), Some(&serde_json::json!(true)));
        let session = SessionRepository::find(&store, &request.session_id).await.unwrap().unwrap();
        assert!(session.ended_at.is_some());
    }
}
