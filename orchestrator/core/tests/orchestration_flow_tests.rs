// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end orchestration flows over the in-memory store
//!
//! These tests drive the engine the way agents do:
//! 1. Submit a batch for a wave
//! 2. Report subtask outcomes
//! 3. Drain the cascade queue
//! 4. Check wave, batch and request settlement

use conductor_core::application::{BatchTaskSpec, CascadeWorker, Conductor, RestoreRequest, Stores, SubmitBatch};
use conductor_core::domain::agent::AgentId;
use conductor_core::domain::batch::BatchStatus;
use conductor_core::domain::conflict::ConflictKind;
use conductor_core::domain::coordination::NoopCoordination;
use conductor_core::domain::orchestrator_config::OrchestratorConfigManifest;
use conductor_core::domain::session::{RequestStatus, SessionId};
use conductor_core::domain::snapshot::{SnapshotContent, SnapshotTrigger};
use conductor_core::domain::subtask::{SubtaskResult, SubtaskStatus};
use conductor_core::domain::wave::WaveStatus;
use conductor_core::application::snapshot_manager::RestoreSource;
use conductor_core::application::subtask_service::CreateSubtask;
use conductor_core::infrastructure::event_bus::EventBus;
use conductor_core::infrastructure::scope_registry::StaticScopeRegistry;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn conductor() -> (Conductor, CascadeWorker) {
    conductor_with_queue(OrchestratorConfigManifest::default().spec.jobs.queue_capacity)
}

fn conductor_with_queue(queue_capacity: usize) -> (Conductor, CascadeWorker) {
    let mut spec = OrchestratorConfigManifest::default().spec;
    spec.jobs.queue_capacity = queue_capacity;
    Conductor::new(
        Stores::in_memory(),
        &spec,
        Arc::new(EventBus::with_default_capacity()),
        Arc::new(NoopCoordination),
        Arc::new(StaticScopeRegistry::new()),
    )
}

fn task(description: &str, agent: &str) -> BatchTaskSpec {
    BatchTaskSpec {
        description: description.to_string(),
        agent_type: Some("backend-developer".into()),
        agent_id: Some(AgentId::from(agent)),
        ..Default::default()
    }
}

fn submission(session: &str, tasks: Vec<BatchTaskSpec>) -> SubmitBatch {
    SubmitBatch {
        session_id: SessionId::from(session),
        wave_number: 1,
        name: None,
        tasks,
    }
}

#[tokio::test]
async fn test_batch_with_a_failure_settles_failed() {
    let (conductor, mut worker) = conductor();
    let submitted = conductor
        .batches
        .submit_batch(submission(
            "s1",
            vec![task("Add login", "a1"), task("Add logout", "a2"), task("Add session store", "a3")],
        ))
        .await
        .unwrap();
    assert_eq!(submitted.wave.total_tasks, 3);

    let ids: Vec<_> = submitted.subtasks.iter().map(|s| s.id).collect();
    conductor
        .subtasks
        .complete(ids[0], SubtaskResult::from(json!({"summary": "login done"})))
        .await
        .unwrap();
    conductor
        .subtasks
        .complete(ids[1], SubtaskResult::from(json!({"summary": "logout done"})))
        .await
        .unwrap();
    conductor.subtasks.fail(ids[2], "migration failed").await.unwrap();
    worker.run_pending().await;

    let view = conductor.batches.get_batch(submitted.batch.id).await.unwrap();
    assert_eq!(view.batch.status, BatchStatus::Failed);
    assert_eq!(view.batch.completed_tasks, 2);
    assert_eq!(view.batch.failed_tasks, 1);
    let synthesis = view.batch.synthesis.expect("stored synthesis");
    assert!(!synthesis.next_wave_ready);

    let wave = conductor
        .scheduler
        .current_wave(&SessionId::from("s1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wave.status, WaveStatus::Failed);
    assert_eq!(wave.completed_tasks + wave.failed_tasks, wave.total_tasks);

    let request = conductor.scheduler.request_of(wave.request_id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Failed);
}

#[tokio::test]
async fn test_repeated_completion_keeps_counters_bounded() {
    let (conductor, mut worker) = conductor();
    let submitted = conductor
        .batches
        .submit_batch(submission("s1", vec![task("Add login", "a1")]))
        .await
        .unwrap();
    let id = submitted.subtasks[0].id;

    for _ in 0..3 {
        conductor.subtasks.complete(id, SubtaskResult::default()).await.unwrap();
    }
    worker.run_pending().await;
    // A redundant cascade for the same wave must not count twice.
    conductor
        .scheduler
        .record_outcome(submitted.wave.id, false)
        .await
        .unwrap();

    let wave = conductor.scheduler.current_wave(&SessionId::from("s1")).await.unwrap().unwrap();
    assert_eq!(wave.status, WaveStatus::Completed);
    assert_eq!(wave.completed_tasks, 1);
    assert_eq!(wave.failed_tasks, 0);

    let batch = conductor.batches.get_batch(submitted.batch.id).await.unwrap().batch;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.completed_tasks, 1);
}

#[tokio::test]
async fn test_shared_file_yields_single_conflict() {
    let (conductor, mut worker) = conductor();
    let submitted = conductor
        .batches
        .submit_batch(submission("s1", vec![task("Edit x", "a1"), task("Refactor x", "a2")]))
        .await
        .unwrap();
    for subtask in &submitted.subtasks {
        conductor
            .subtasks
            .complete(subtask.id, SubtaskResult::from(json!({"files": ["src/x.ts"]})))
            .await
            .unwrap();
    }
    worker.run_pending().await;

    let conflicts = conductor.batches.conflicts(submitted.batch.id).await.unwrap();
    let file_conflicts: Vec<_> = conflicts.iter().filter(|c| c.kind == ConflictKind::File).collect();
    assert_eq!(file_conflicts.len(), 1);
    assert_eq!(file_conflicts[0].file.as_deref(), Some("src/x.ts"));
    assert!(file_conflicts[0].agents.contains(&"a1".to_string()));
    assert!(file_conflicts[0].agents.contains(&"a2".to_string()));
}

#[tokio::test]
async fn test_explicit_completion_is_idempotent() {
    let (conductor, _worker) = conductor();
    let submitted = conductor
        .batches
        .submit_batch(submission("s1", vec![task("Add login", "a1"), task("Add logout", "a2")]))
        .await
        .unwrap();

    let first = conductor.batches.complete_batch(submitted.batch.id).await.unwrap();
    let second = conductor.batches.complete_batch(submitted.batch.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.stats.unfinished, 2);
}

#[tokio::test]
async fn test_restore_includes_work_started_after_snapshot() {
    let (conductor, _worker) = conductor();
    let session = SessionId::from("s1");
    let snapshot = conductor
        .snapshots
        .save(
            &session,
            SnapshotTrigger::Manual,
            SnapshotContent {
                context_summary: Some("Auth rewrite underway".into()),
                key_decisions: vec!["Use JWT".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    conductor
        .subtasks
        .create(CreateSubtask {
            session_id: session.clone(),
            wave_number: 2,
            description: "Wire refresh tokens".into(),
            agent_type: Some("backend-developer".into()),
            agent_id: Some(AgentId::from("a1")),
            status: SubtaskStatus::Running,
            blocked_by: Vec::new(),
            priority: 0,
        })
        .await
        .unwrap();

    let brief = conductor
        .snapshots
        .restore(RestoreRequest {
            session_id: session.clone(),
            agent_id: AgentId::from("a1"),
            agent_type: Some("backend-developer".into()),
            compact_summary: None,
            max_tokens: None,
        })
        .await
        .unwrap();

    assert_eq!(brief.source, RestoreSource::Snapshot);
    assert_eq!(brief.snapshot_id, Some(snapshot.id));
    assert_eq!(brief.live_updates, 1);
    assert!(brief.brief.contains("Wire refresh tokens"));
    assert!(brief.brief.contains("Use JWT"));
    assert_eq!(brief.compact_count, 1);
}

#[tokio::test]
async fn test_tiny_queue_settles_batch_before_shutdown_completes() {
    let (conductor, worker) = conductor_with_queue(1);
    let submitted = conductor
        .batches
        .submit_batch(submission(
            "s1",
            vec![task("Add login", "a1"), task("Add logout", "a2"), task("Add session store", "a3")],
        ))
        .await
        .unwrap();
    let ids: Vec<_> = submitted.subtasks.iter().map(|s| s.id).collect();

    let shutdown = CancellationToken::new();
    let handles = conductor.start_background(worker, shutdown.clone());
    conductor.subtasks.complete(ids[0], SubtaskResult::default()).await.unwrap();
    conductor.subtasks.complete(ids[1], SubtaskResult::default()).await.unwrap();
    conductor.subtasks.fail(ids[2], "migration failed").await.unwrap();

    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }

    let view = conductor.batches.get_batch(submitted.batch.id).await.unwrap();
    assert_eq!(view.batch.completed_tasks, 2);
    assert_eq!(view.batch.failed_tasks, 1);
    assert_eq!(view.batch.status, BatchStatus::Failed);

    let wave = conductor
        .scheduler
        .current_wave(&SessionId::from("s1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wave.completed_tasks + wave.failed_tasks, wave.total_tasks);
    assert_eq!(wave.status, WaveStatus::Failed);
}
