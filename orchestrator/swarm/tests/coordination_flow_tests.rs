// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the engine wired to the coordination layer
//!
//! Completion broadcasts, blocking state and pending messages must reach
//! other agents and restore briefs through the coordination port.

use conductor_core::application::snapshot_manager::RestoreSource;
use conductor_core::application::subtask_service::CreateSubtask;
use conductor_core::application::{Conductor, RestoreRequest, Stores};
use conductor_core::domain::agent::AgentId;
use conductor_core::domain::orchestrator_config::OrchestratorConfigManifest;
use conductor_core::domain::session::SessionId;
use conductor_core::domain::subtask::{SubtaskResult, SubtaskStatus};
use conductor_core::infrastructure::event_bus::EventBus;
use conductor_core::infrastructure::scope_registry::StaticScopeRegistry;
use conductor_swarm::application::{FetchOptions, SwarmServices};
use conductor_swarm::domain::MessageTopic;
use serde_json::json;
use std::sync::Arc;

fn wire() -> (Conductor, conductor_core::application::CascadeWorker, SwarmServices) {
    let spec = OrchestratorConfigManifest::default().spec;
    let bus = Arc::new(EventBus::new(spec.events.channel_capacity));
    let swarm = SwarmServices::in_memory(bus.clone(), spec.messaging.clone());
    let (conductor, worker) = Conductor::new(
        Stores::in_memory(),
        &spec,
        bus,
        swarm.coordination.clone(),
        Arc::new(StaticScopeRegistry::new()),
    );
    (conductor, worker, swarm)
}

fn running(session: &SessionId, agent: &str, description: &str) -> CreateSubtask {
    CreateSubtask {
        session_id: session.clone(),
        wave_number: 1,
        description: description.into(),
        agent_type: Some("backend-developer".into()),
        agent_id: Some(AgentId::from(agent)),
        status: SubtaskStatus::Running,
        blocked_by: Vec::new(),
        priority: 0,
    }
}

#[tokio::test]
async fn test_completed_subtask_is_broadcast_to_peers() {
    let (conductor, mut worker, swarm) = wire();
    let session = SessionId::from("s1");
    let created = conductor
        .subtasks
        .create(running(&session, "a1", "Add token refresh"))
        .await
        .unwrap();
    conductor
        .subtasks
        .complete(
            created.subtask.id,
            SubtaskResult::from(json!({"summary": "refresh endpoint added", "files": ["src/auth.rs"]})),
        )
        .await
        .unwrap();
    worker.run_pending().await;

    let inbox = swarm
        .messaging
        .fetch(&AgentId::from("a2"), FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(inbox.messages.len(), 1);
    let message = &inbox.messages[0];
    assert_eq!(message.topic, MessageTopic::TaskCompleted);
    assert_eq!(message.from, AgentId::from("a1"));
    assert_eq!(message.payload.summary(), Some("refresh endpoint added"));
    assert_eq!(inbox.unread_count, 0);
}

#[tokio::test]
async fn test_live_restore_lists_messages_and_blocking() {
    let (conductor, _worker, swarm) = wire();
    let session = SessionId::from("s1");
    conductor
        .subtasks
        .create(running(&session, "a1", "Migrate the users table"))
        .await
        .unwrap();
    swarm
        .blocking
        .block(&AgentId::from("a2"), &AgentId::from("a1"), "waiting for the users schema")
        .await
        .unwrap();
    swarm
        .messaging
        .publish(conductor_swarm::application::PublishMessage {
            from: AgentId::from("a2"),
            to: Some(AgentId::from("a1")),
            topic: MessageTopic::Question,
            payload: json!({"summary": "Is email unique?"}).into(),
            priority: Default::default(),
            ttl_seconds: None,
        })
        .await
        .unwrap();

    let brief = conductor
        .snapshots
        .restore(RestoreRequest {
            session_id: session,
            agent_id: AgentId::from("a1"),
            agent_type: Some("backend-developer".into()),
            compact_summary: None,
            max_tokens: None,
        })
        .await
        .unwrap();

    assert_eq!(brief.source, RestoreSource::Live);
    assert!(brief.brief.contains("Migrate the users table"));
    assert!(brief.brief.contains("Is email unique?"));
    assert!(brief.brief.contains("waiting for the users schema"));
}
