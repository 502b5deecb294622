// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Blocking Coordinator Application Service
//!
//! Records who is waiting on whom and tells the waiting agent when that
//! changes. It never suspends a caller.

use crate::domain::blocking::{BlockingRelation, BlockingStatus};
use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::repository::BlockingRepository;
use chrono::Utc;
use conductor_core::domain::agent::AgentId;
use conductor_core::domain::events::CoordinationEvent;
use conductor_core::infrastructure::event_bus::EventBus;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct BlockingCoordinator {
    relations: Arc<dyn BlockingRepository>,
    event_bus: Arc<EventBus>,
}

impl BlockingCoordinator {
    pub fn new(relations: Arc<dyn BlockingRepository>, event_bus: Arc<EventBus>) -> Self {
        Self { relations, event_bus }
    }

    /// Record that `blocker` holds up `blocked`. Blocking the same pair again
    /// only replaces the reason.
    pub async fn block(&self, blocker: &AgentId, blocked: &AgentId, reason: &str) -> SwarmResult<BlockingRelation> {
        if blocker.as_str().trim().is_empty() || blocked.as_str().trim().is_empty() {
            return Err(SwarmError::Validation("blocker and blocked must not be empty".into()));
        }
        if blocker == blocked {
            return Err(SwarmError::SelfBlock(blocker.to_string()));
        }

        let upsert = self.relations.upsert(blocker, blocked, reason.trim(), Utc::now()).await?;
        let relation = upsert.relation;
        info!(
            relation_id = %relation.id,
            blocker = %relation.blocker,
            blocked = %relation.blocked,
            created = upsert.created,
            "Agent blocked"
        );
        self.event_bus.publish_coordination_event(CoordinationEvent::AgentBlocked {
            relation_id: relation.id,
            blocker: relation.blocker.clone(),
            blocked: relation.blocked.clone(),
            reason: relation.reason.clone(),
            at: relation.updated_at,
        });
        Ok(relation)
    }

    pub async fn status(&self, agent: &AgentId) -> SwarmResult<BlockingStatus> {
        let blocked_by = self.relations.blockers_of(agent).await?;
        let blocking = self.relations.blocked_by(agent).await?;
        Ok(BlockingStatus::new(agent.clone(), blocked_by, blocking))
    }

    pub async fn check(&self, blocker: &AgentId, blocked: &AgentId) -> SwarmResult<Option<BlockingRelation>> {
        Ok(self.relations.find(blocker, blocked).await?)
    }

    pub async fn unblock(&self, blocker: &AgentId, blocked: &AgentId) -> SwarmResult<BlockingRelation> {
        let relation = self
            .relations
            .delete(blocker, blocked)
            .await?
            .ok_or_else(|| SwarmError::NotFound(format!("blocking relation {blocker} -> {blocked}")))?;
        self.announce_unblock(&relation);
        Ok(relation)
    }

    pub async fn unblock_by_id(&self, id: Uuid) -> SwarmResult<BlockingRelation> {
        let relation = self
            .relations
            .delete_by_id(id)
            .await?
            .ok_or_else(|| SwarmError::NotFound(format!("blocking relation {id}")))?;
        self.announce_unblock(&relation);
        Ok(relation)
    }

    fn announce_unblock(&self, relation: &BlockingRelation) {
        info!(relation_id = %relation.id, blocker = %relation.blocker, blocked = %relation.blocked, "Agent unblocked");
        self.event_bus.publish_coordination_event(CoordinationEvent::AgentUnblocked {
            relation_id: relation.id,
            blocker: relation.blocker.clone(),
            blocked: relation.blocked.clone(),
            at: Utc::now(),
        });
    }
}
