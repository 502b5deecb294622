// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Subtask Lifecycle Service
//!
//! Every mutation agents make to their own subtasks goes through here. A
//! terminal transition is persisted before anything else happens; the
//! cascades that follow from it are queued and never awaited.

use super::cascade::{CascadeJob, CascadeQueue};
use super::wave_scheduler::WaveScheduler;
use crate::domain::agent::AgentId;
use crate::domain::error::{OrchestrationError, OrchestrationResult};
use crate::domain::events::OrchestrationEvent;
use crate::domain::repository::SubtaskRepository;
use crate::domain::session::SessionId;
use crate::domain::subtask::{InitialStatus, Subtask, SubtaskId, SubtaskResult, SubtaskStatus, TransitionOutcome};
use crate::domain::wave::Wave;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubtask {
    pub session_id: SessionId,
    pub wave_number: u32,
    pub description: String,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    /// `pending` or `running`.
    #[serde(default = "default_create_status")]
    pub status: SubtaskStatus,
    #[serde(default)]
    pub blocked_by: Vec<SubtaskId>,
    #[serde(default)]
    pub priority: i32,
}

fn default_create_status() -> SubtaskStatus {
    SubtaskStatus::Pending
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSubtask {
    pub subtask: Subtask,
    pub wave: Wave,
}

/// Outcome of a status change as seen by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SubtaskUpdate {
    pub subtask: Subtask,
    /// False when the subtask was already in the requested or a terminal status.
    pub applied: bool,
}

pub struct SubtaskService {
    subtasks: Arc<dyn SubtaskRepository>,
    scheduler: Arc<WaveScheduler>,
    jobs: CascadeQueue,
    event_bus: Arc<EventBus>,
}

impl SubtaskService {
    pub fn new(
        subtasks: Arc<dyn SubtaskRepository>,
        scheduler: Arc<WaveScheduler>,
        jobs: CascadeQueue,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            subtasks,
            scheduler,
            jobs,
            event_bus,
        }
    }

    /// Insert a subtask into the wave, creating the wave if needed. The
    /// wave's `total_tasks` moves in the same store operation.
    pub async fn create(&self, request: CreateSubtask) -> OrchestrationResult<CreatedSubtask> {
        if request.session_id.as_str().trim().is_empty() {
            return Err(OrchestrationError::Validation("session_id must not be empty".into()));
        }
        if request.description.trim().is_empty() {
            return Err(OrchestrationError::Validation("description must not be empty".into()));
        }
        let initial = InitialStatus::try_from(request.status).map_err(|status| {
            OrchestrationError::Validation(format!("subtasks are created pending or running, not {status}"))
        })?;

        let wave = self
            .scheduler
            .get_or_create_wave(&request.session_id, request.wave_number)
            .await?;
        let mut subtask = Subtask::new(
            request.session_id,
            wave.request_id,
            wave.id,
            wave.wave_number,
            request.description,
            request.agent_type,
            request.agent_id,
            initial,
        );
        subtask.blocked_by = request.blocked_by.into_iter().collect();
        subtask.priority = request.priority;

        let mut wave = self.subtasks.create_in_wave(&subtask).await?;
        if subtask.status == SubtaskStatus::Running {
            wave = self.scheduler.ensure_running(wave.id).await?;
        }
        info!(
            subtask_id = %subtask.id,
            session_id = %subtask.session_id,
            wave_number = subtask.wave_number,
            status = %subtask.status,
            "Subtask created"
        );
        Ok(CreatedSubtask { subtask, wave })
    }

    pub async fn get(&self, id: SubtaskId) -> OrchestrationResult<Subtask> {
        self.subtasks
            .find(id)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("subtask {id}")))
    }

    /// Subtasks of wave `wave_number` of the session's current request.
    pub async fn list_for_wave(&self, session: &SessionId, wave_number: u32) -> OrchestrationResult<Vec<Subtask>> {
        let wave = self.scheduler.get_or_create_wave(session, wave_number).await?;
        Ok(self.subtasks.list_for_wave(wave.id).await?)
    }

    pub async fn start(&self, id: SubtaskId) -> OrchestrationResult<SubtaskUpdate> {
        self.transition(id, SubtaskStatus::Running, None).await
    }

    pub async fn pause(&self, id: SubtaskId) -> OrchestrationResult<SubtaskUpdate> {
        self.transition(id, SubtaskStatus::Paused, None).await
    }

    pub async fn mark_blocked(&self, id: SubtaskId) -> OrchestrationResult<SubtaskUpdate> {
        self.transition(id, SubtaskStatus::Blocked, None).await
    }

    pub async fn complete(&self, id: SubtaskId, result: SubtaskResult) -> OrchestrationResult<SubtaskUpdate> {
        self.transition(id, SubtaskStatus::Completed, Some(result)).await
    }

    pub async fn fail(&self, id: SubtaskId, reason: impl Into<String>) -> OrchestrationResult<SubtaskUpdate> {
        self.transition(id, SubtaskStatus::Failed, Some(SubtaskResult::failure(reason)))
            .await
    }

    /// Persist a status change, then queue whatever follows from it.
    pub async fn transition(
        &self,
        id: SubtaskId,
        to: SubtaskStatus,
        result: Option<SubtaskResult>,
    ) -> OrchestrationResult<SubtaskUpdate> {
        let now = Utc::now();
        let record = self.subtasks.transition(id, to, result, now).await?;
        let TransitionOutcome::Applied { from } = record.outcome else {
            return Ok(SubtaskUpdate {
                subtask: record.subtask,
                applied: false,
            });
        };
        let subtask = record.subtask;

        info!(subtask_id = %subtask.id, %from, to = %subtask.status, "Subtask transitioned");
        self.event_bus
            .publish_orchestration_event(OrchestrationEvent::SubtaskTransitioned {
                subtask_id: subtask.id,
                session_id: subtask.session_id.clone(),
                wave_number: subtask.wave_number,
                agent_id: subtask.agent_id.clone(),
                from,
                to: subtask.status,
                at: now,
            });

        if subtask.status == SubtaskStatus::Running {
            self.scheduler.ensure_running(subtask.wave_id).await?;
        }
        if subtask.is_terminal() {
            self.enqueue_cascades(&subtask).await;
        }
        Ok(SubtaskUpdate { subtask, applied: true })
    }

    /// The counter cascade waits for queue room so it is never dropped; the
    /// broadcast and context jobs are best-effort.
    async fn enqueue_cascades(&self, subtask: &Subtask) {
        let settle = CascadeJob::SubtaskTerminal {
            subtask: subtask.clone(),
        };
        if !self.jobs.submit(settle).await {
            error!(subtask_id = %subtask.id, wave_id = %subtask.wave_id, "Counter cascade not queued");
        }
        let best_effort = [
            CascadeJob::BroadcastResult {
                subtask: subtask.clone(),
            },
            CascadeJob::PopulateAgentContext {
                subtask: subtask.clone(),
            },
        ];
        for job in best_effort {
            if !self.jobs.enqueue(job) {
                warn!(subtask_id = %subtask.id, "Cascade not queued");
            }
        }
    }

    /// Orphan sweep on session end. Force-completes every open subtask with
    /// the session-ended result and ends the session. No cascades run.
    pub async fn close_session(&self, session: &SessionId) -> OrchestrationResult<Vec<Subtask>> {
        if session.as_str().trim().is_empty() {
            return Err(OrchestrationError::Validation("session_id must not be empty".into()));
        }
        let now = Utc::now();
        let closed = self.subtasks.close_session(session, now).await?;
        info!(session_id = %session, orphans = closed.len(), "Session closed");
        self.event_bus
            .publish_orchestration_event(OrchestrationEvent::SessionClosed {
                session_id: session.clone(),
                orphans_closed: closed.len(),
                closed_at: now,
            });
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::aggregation::AggregationEngine;
    use crate::application::cascade::CascadeHandler;
    use crate::application::repository_factory::Stores;
    use crate::domain::conflict::ConflictPolicy;
    use crate::domain::coordination::NoopCoordination;
    use crate::domain::wave::WaveStatus;
    use crate::infrastructure::job_queue::{JobQueue, JobWorker};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        stores: Stores,
        service: SubtaskService,
        worker: JobWorker<CascadeJob, CascadeHandler>,
    }

    fn fixture() -> Fixture {
        fixture_with_capacity(64)
    }

    fn fixture_with_capacity(capacity: usize) -> Fixture {
        let stores = Stores::in_memory();
        let bus = Arc::new(EventBus::with_default_capacity());
        let scheduler = Arc::new(WaveScheduler::new(stores.requests.clone(), stores.waves.clone(), bus.clone()));
        let aggregation = Arc::new(AggregationEngine::new(
            stores.batches.clone(),
            stores.subtasks.clone(),
            stores.requests.clone(),
            bus.clone(),
            ConflictPolicy::default(),
        ));
        let handler = Arc::new(CascadeHandler::new(
            scheduler.clone(),
            aggregation,
            stores.batches.clone(),
            stores.contexts.clone(),
            Arc::new(NoopCoordination),
        ));
        let (jobs, worker) = JobQueue::new(capacity, handler);
        let service = SubtaskService::new(stores.subtasks.clone(), scheduler, jobs, bus);
        Fixture { stores, service, worker }
    }

    fn create(session: &str, wave: u32, status: SubtaskStatus) -> CreateSubtask {
        CreateSubtask {
            session_id: SessionId::from(session),
            wave_number: wave,
            description: "Implement the login handler".into(),
            agent_type: Some("backend-developer".into()),
            agent_id: Some(AgentId::from("agent-1")),
            status,
            blocked_by: Vec::new(),
            priority: 0,
        }
    }

    #[tokio::test]
    async fn test_create_counts_against_wave_and_starts_it() {
        let f = fixture();
        let created = f.service.create(create("s1", 1, SubtaskStatus::Running)).await.unwrap();
        assert_eq!(created.wave.total_tasks, 1);
        assert_eq!(created.wave.status, WaveStatus::Running);
        assert!(created.subtask.started_at.is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_terminal_status() {
        let f = fixture();
        let err = f
            .service
            .create(create("s1", 1, SubtaskStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
    }

    #[tokio::test]
    async fn test_completion_cascade_settles_wave_and_context() {
        let mut f = fixture();
        let created = f.service.create(create("s1", 1, SubtaskStatus::Pending)).await.unwrap();
        let result = SubtaskResult::from(json!({"summary": "done", "files": ["src/auth.rs"]}));

        let update = f.service.complete(created.subtask.id, result).await.unwrap();
        assert!(update.applied);
        assert!(update.subtask.completed_at.is_some());

        assert_eq!(f.worker.run_pending().await, 3);

        let wave = f.stores.waves.find_by_id(created.wave.id).await.unwrap().unwrap();
        assert_eq!(wave.status, WaveStatus::Completed);
        assert_eq!(wave.completed_tasks, 1);

        let context = f
            .stores
            .contexts
            .find(&SessionId::from("s1"), &AgentId::from("agent-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(context.files_touched, vec!["src/auth.rs".to_string()]);
        assert_eq!(context.last_summary.as_deref(), Some("done"));
        assert!(context.current_subtask.is_none());
    }

    #[tokio::test]
    async fn test_terminal_subtask_ignores_further_transitions() {
        let mut f = fixture();
        let created = f.service.create(create("s1", 1, SubtaskStatus::Running)).await.unwrap();
        f.service.fail(created.subtask.id, "compile error").await.unwrap();
        let again = f.service.complete(created.subtask.id, SubtaskResult::default()).await.unwrap();
        assert!(!again.applied);
        assert_eq!(again.subtask.status, SubtaskStatus::Failed);

        // Only the first terminal transition queued cascades.
        assert_eq!(f.worker.run_pending().await, 3);
        let wave = f.stores.waves.find_by_id(created.wave.id).await.unwrap().unwrap();
        assert_eq!(wave.failed_tasks, 1);
        assert_eq!(wave.completed_tasks, 0);
        assert_eq!(wave.status, WaveStatus::Failed);
    }

    #[tokio::test]
    async fn test_moving_back_to_pending_is_a_conflict() {
        let f = fixture();
        let created = f.service.create(create("s1", 1, SubtaskStatus::Running)).await.unwrap();
        let err = f
            .service
            .transition(created.subtask.id, SubtaskStatus::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_close_session_sweeps_orphans_without_cascades() {
        let mut f = fixture();
        let open = f.service.create(create("s1", 1, SubtaskStatus::Running)).await.unwrap();
        let done = f.service.create(create("s1", 1, SubtaskStatus::Pending)).await.unwrap();
        f.service.complete(done.subtask.id, SubtaskResult::default()).await.unwrap();
        f.worker.run_pending().await;

        let closed = f.service.close_session(&SessionId::from("s1")).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, open.subtask.id);
        assert_eq!(closed[0].status, SubtaskStatus::Completed);
        assert_eq!(closed[0].result, Some(SubtaskResult::session_ended()));
        assert_eq!(f.worker.run_pending().await, 0);

        let session = f.stores.sessions.find(&SessionId::from("s1")).await.unwrap().unwrap();
        assert!(session.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_small_queue_never_loses_wave_outcomes() {
        let f = fixture_with_capacity(1);
        let first = f.service.create(create("s1", 1, SubtaskStatus::Running)).await.unwrap();
        let second = f.service.create(create("s1", 1, SubtaskStatus::Running)).await.unwrap();
        let wave_id = first.wave.id;

        let shutdown = CancellationToken::new();
        let worker = f.worker.start(shutdown.clone());
        f.service.complete(first.subtask.id, SubtaskResult::default()).await.unwrap();
        f.service.complete(second.subtask.id, SubtaskResult::default()).await.unwrap();
        let retry = f.service.complete(second.subtask.id, SubtaskResult::default()).await.unwrap();
        assert!(!retry.applied);

        shutdown.cancel();
        worker.await.unwrap();

        let wave = f.stores.waves.find_by_id(wave_id).await.unwrap().unwrap();
        assert_eq!(wave.total_tasks, 2);
        assert_eq!(wave.completed_tasks, 2);
        assert_eq!(wave.status, WaveStatus::Completed);
    }
}
