// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Adapter exposing the messaging bus and the blocking ledger to the core
//! engine through its [`CoordinationPort`].

use super::blocking::BlockingCoordinator;
use super::messaging::{MessagingService, PublishMessage};
use crate::domain::message::{MessagePayload, MessageTopic, Priority};
use async_trait::async_trait;
use conductor_core::domain::agent::AgentId;
use conductor_core::domain::coordination::{BlockingDigest, CoordinationError, CoordinationPort, MessageDigest};
use conductor_core::domain::lookup::{DegradedLookupError, IntoDegraded};
use conductor_core::domain::session::SessionId;
use conductor_core::domain::snapshot::SnapshotId;
use conductor_core::domain::subtask::{Subtask, SubtaskStatus};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Sender id used for messages the engine publishes itself.
pub const CONDUCTOR_AGENT: &str = "conductor";

/// Digests handed to restore briefs are capped at this many messages.
const DIGEST_LIMIT: u32 = 20;

pub struct SwarmCoordination {
    messaging: Arc<MessagingService>,
    blocking: Arc<BlockingCoordinator>,
}

impl SwarmCoordination {
    pub fn new(messaging: Arc<MessagingService>, blocking: Arc<BlockingCoordinator>) -> Self {
        Self { messaging, blocking }
    }
}

#[async_trait]
impl CoordinationPort for SwarmCoordination {
    async fn broadcast_subtask_result(&self, subtask: &Subtask) -> Result<(), CoordinationError> {
        let (topic, priority) = match subtask.status {
            SubtaskStatus::Failed => (MessageTopic::TaskFailed, Priority::High),
            _ => (MessageTopic::TaskCompleted, Priority::Normal),
        };
        let result = subtask.result.as_ref();
        let body = json!({
            "subtask_id": subtask.id,
            "session_id": subtask.session_id,
            "wave_number": subtask.wave_number,
            "status": subtask.status,
            "agent_type": subtask.agent_type,
            "summary": result.and_then(|r| r.summary.clone()).unwrap_or_else(|| subtask.description.clone()),
            "files": subtask.referenced_files(),
            "error": result.and_then(|r| r.error.clone()),
        });
        let from = subtask
            .agent_id
            .clone()
            .unwrap_or_else(|| AgentId::from(CONDUCTOR_AGENT));

        self.messaging
            .publish(PublishMessage {
                from,
                to: None,
                topic,
                payload: MessagePayload::new(body),
                priority,
                ttl_seconds: None,
            })
            .await
            .map_err(|e| CoordinationError(e.to_string()))?;
        debug!(subtask_id = %subtask.id, topic = topic.as_str(), "Subtask result broadcast");
        Ok(())
    }

    async fn pending_messages(&self, agent: &AgentId) -> Result<Vec<MessageDigest>, DegradedLookupError> {
        let messages = self
            .messaging
            .peek_unread(agent, DIGEST_LIMIT)
            .await
            .degrade("pending messages")?;
        Ok(messages
            .into_iter()
            .map(|m| MessageDigest {
                summary: m.payload.summary().map(str::to_string).unwrap_or_else(|| m.payload.body.to_string()),
                from: m.from,
                topic: m.topic.as_str().to_string(),
                priority: m.priority.level(),
                created_at: m.created_at,
            })
            .collect())
    }

    async fn blocking_for(&self, agent: &AgentId) -> Result<Vec<BlockingDigest>, DegradedLookupError> {
        let status = self.blocking.status(agent).await.degrade("blocking relations")?;
        Ok(status
            .blocked_by
            .into_iter()
            .chain(status.blocking)
            .map(|r| BlockingDigest {
                blocker: r.blocker,
                blocked: r.blocked,
                reason: r.reason,
            })
            .collect())
    }

    async fn request_compaction(
        &self,
        agent: &AgentId,
        session: &SessionId,
        snapshot: SnapshotId,
    ) -> Result<(), CoordinationError> {
        self.messaging
            .publish(PublishMessage {
                from: AgentId::from(CONDUCTOR_AGENT),
                to: Some(agent.clone()),
                topic: MessageTopic::CompactRequested,
                payload: MessagePayload::new(json!({
                    "summary": "Context is nearly full; a snapshot was saved. Compact and restore.",
                    "session_id": session,
                    "snapshot_id": snapshot,
                })),
                priority: Priority::Critical,
                ttl_seconds: None,
            })
            .await
            .map_err(|e| CoordinationError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::messaging::FetchOptions;
    use crate::infrastructure::InMemorySwarmStore;
    use conductor_core::domain::orchestrator_config::MessagingConfig;
    use conductor_core::domain::session::RequestId;
    use conductor_core::domain::subtask::{InitialStatus, SubtaskResult};
    use conductor_core::domain::wave::WaveId;
    use conductor_core::infrastructure::event_bus::EventBus;

    fn adapter() -> (SwarmCoordination, Arc<MessagingService>) {
        let store = Arc::new(InMemorySwarmStore::new());
        let bus = Arc::new(EventBus::with_default_capacity());
        let messaging = Arc::new(MessagingService::new(
            store.clone(),
            store.clone(),
            bus.clone(),
            MessagingConfig::default(),
        ));
        let blocking = Arc::new(BlockingCoordinator::new(store, bus));
        (SwarmCoordination::new(messaging.clone(), blocking), messaging)
    }

    #[tokio::test]
    async fn test_failed_subtask_is_broadcast_as_task_failed() {
        let (adapter, messaging) = adapter();
        let mut subtask = Subtask::new(
            SessionId::from("s1"),
            RequestId::new(),
            WaveId::new(),
            1,
            "Port the auth module",
            Some("backend-developer".into()),
            Some(AgentId::from("a1")),
            InitialStatus::Running,
        );
        subtask
            .transition(
                SubtaskStatus::Failed,
                Some(SubtaskResult::failure("tests red")),
                chrono::Utc::now(),
            )
            .unwrap();

        adapter.broadcast_subtask_result(&subtask).await.unwrap();
        let inbox = messaging.fetch(&AgentId::from("a2"), FetchOptions::default()).await.unwrap();
        assert_eq!(inbox.messages.len(), 1);
        assert_eq!(inbox.messages[0].topic, MessageTopic::TaskFailed);
        assert_eq!(inbox.messages[0].priority, Priority::High);
    }

    #[tokio::test]
    async fn test_pending_digest_does_not_mark_read() {
        let (adapter, messaging) = adapter();
        adapter
            .request_compaction(&AgentId::from("a1"), &SessionId::from("s1"), SnapshotId::new())
            .await
            .unwrap();

        let digest = adapter.pending_messages(&AgentId::from("a1")).await.unwrap();
        assert_eq!(digest.len(), 1);
        assert_eq!(digest[0].topic, "compact.requested");

        let inbox = messaging.fetch(&AgentId::from("a1"), FetchOptions::default()).await.unwrap();
        assert_eq!(inbox.messages.len(), 1);
    }
}
