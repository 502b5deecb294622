// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capacity Backpressure Controller
//!
//! Meters every tool call against the calling agent's context budget and
//! publishes a warning once the agent is in the orange zone or above. The
//! read-modify-write of a capacity row happens inside the store, under its
//! row lock.

use crate::domain::agent::AgentId;
use crate::domain::capacity::{AgentCapacity, CapacityPolicy, ContextHealth, TokenLedgerEntry, TokenUsage};
use crate::domain::error::{OrchestrationError, OrchestrationResult};
use crate::domain::events::CapacityEvent;
use crate::domain::repository::CapacityRepository;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CapacityController {
    capacity: Arc<dyn CapacityRepository>,
    policy: CapacityPolicy,
    event_bus: Arc<EventBus>,
}

impl CapacityController {
    pub fn new(capacity: Arc<dyn CapacityRepository>, policy: CapacityPolicy, event_bus: Arc<EventBus>) -> Self {
        Self {
            capacity,
            policy,
            event_bus,
        }
    }

    pub fn policy(&self) -> &CapacityPolicy {
        &self.policy
    }

    pub async fn track_tokens(&self, usage: TokenUsage) -> OrchestrationResult<AgentCapacity> {
        if usage.agent_id.as_str().trim().is_empty() {
            return Err(OrchestrationError::Validation("agent_id must not be empty".into()));
        }
        if usage.session_id.as_str().trim().is_empty() {
            return Err(OrchestrationError::Validation("session_id must not be empty".into()));
        }
        if usage.tool_name.trim().is_empty() {
            return Err(OrchestrationError::Validation("tool_name must not be empty".into()));
        }

        let now = Utc::now();
        let tokens = self.policy.estimate_call_tokens(usage.input_size, usage.output_size);
        let (capacity, _entry) = self.capacity.record_usage(&usage, tokens, &self.policy, now).await?;

        metrics::counter!("conductor_tokens_tracked_total").increment(tokens);
        metrics::gauge!("conductor_capacity_usage_percent", "agent_id" => capacity.agent_id.0.clone())
            .set(capacity.usage_percent);
        debug!(
            agent_id = %capacity.agent_id,
            tool = %usage.tool_name,
            tokens,
            usage = capacity.current_usage,
            zone = %capacity.zone,
            "Tokens tracked"
        );

        if capacity.zone.is_warning() {
            warn!(
                agent_id = %capacity.agent_id,
                zone = %capacity.zone,
                usage_percent = capacity.usage_percent,
                "Agent capacity above warning threshold"
            );
            self.event_bus.publish_capacity_event(CapacityEvent::CapacityWarning {
                agent_id: capacity.agent_id.clone(),
                session_id: usage.session_id.clone(),
                zone: capacity.zone,
                usage_percent: capacity.usage_percent,
                current_usage: capacity.current_usage,
                max_capacity: capacity.max_capacity,
                predicted_exhaustion_minutes: capacity.predicted_exhaustion_minutes,
                at: now,
            });
        }
        Ok(capacity)
    }

    pub async fn get_capacity(&self, agent: &AgentId) -> OrchestrationResult<AgentCapacity> {
        self.capacity
            .find(agent)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("capacity for agent {agent}")))
    }

    pub async fn get_context_health(&self, agent: &AgentId) -> OrchestrationResult<ContextHealth> {
        Ok(self.get_capacity(agent).await?.health(&self.policy, Utc::now()))
    }

    /// Apply a compaction to the agent's budget.
    pub async fn reset_capacity(&self, agent: &AgentId) -> OrchestrationResult<AgentCapacity> {
        let (before, capacity) = self
            .capacity
            .reset(agent, &self.policy, Utc::now())
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("capacity for agent {agent}")))?;
        self.announce_reset(before, &capacity);
        Ok(capacity)
    }

    pub(crate) fn announce_reset(&self, usage_before: u64, capacity: &AgentCapacity) {
        info!(
            agent_id = %capacity.agent_id,
            usage_before,
            usage_after = capacity.current_usage,
            compact_count = capacity.compact_count,
            "Capacity reset"
        );
        metrics::gauge!("conductor_capacity_usage_percent", "agent_id" => capacity.agent_id.0.clone())
            .set(capacity.usage_percent);
        self.event_bus.publish_capacity_event(CapacityEvent::CapacityReset {
            agent_id: capacity.agent_id.clone(),
            usage_before,
            usage_after: capacity.current_usage,
            compact_count: capacity.compact_count,
            at: capacity.last_compact_at.unwrap_or_else(Utc::now),
        });
    }

    pub async fn ledger(&self, agent: &AgentId, limit: usize) -> OrchestrationResult<Vec<TokenLedgerEntry>> {
        Ok(self.capacity.ledger(agent, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capacity::Zone;
    use crate::domain::session::SessionId;
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::repositories::InMemoryStore;

    fn controller() -> (CapacityController, Arc<EventBus>) {
        let bus = Arc::new(EventBus::with_default_capacity());
        let controller = CapacityController::new(Arc::new(InMemoryStore::new()), CapacityPolicy::default(), bus.clone());
        (controller, bus)
    }

    fn usage(chars: u64) -> TokenUsage {
        TokenUsage {
            agent_id: AgentId::from("agent-1"),
            session_id: SessionId::from("s1"),
            tool_name: "Read".to_string(),
            input_size: chars,
            output_size: 0,
        }
    }

    #[tokio::test]
    async fn test_first_report_creates_row() {
        let (controller, _) = controller();
        let capacity = controller.track_tokens(usage(400)).await.unwrap();
        assert_eq!(capacity.current_usage, 100);
        assert_eq!(capacity.max_capacity, 200_000);
        assert_eq!(capacity.zone, Zone::Green);
        assert_eq!(controller.ledger(&capacity.agent_id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_warning_published_from_orange() {
        let (controller, bus) = controller();
        let mut events = bus.subscribe();
        for _ in 0..2 {
            controller.track_tokens(usage(200_000)).await.unwrap();
        }
        assert!(events.try_recv().is_err());

        let capacity = controller.track_tokens(usage(200_000)).await.unwrap();
        assert_eq!(capacity.current_usage, 150_000);
        assert_eq!(capacity.zone, Zone::Orange);
        match events.try_recv().unwrap() {
            DomainEvent::Capacity(CapacityEvent::CapacityWarning { zone, .. }) => assert_eq!(zone, Zone::Orange),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reset_keeps_twenty_percent() {
        let (controller, _) = controller();
        controller.track_tokens(usage(200_000)).await.unwrap();
        let before = controller.get_capacity(&AgentId::from("agent-1")).await.unwrap().current_usage;
        let after = controller.reset_capacity(&AgentId::from("agent-1")).await.unwrap();
        assert_eq!(after.current_usage, before / 5);
        assert_eq!(after.compact_count, 1);
        assert!(after.last_compact_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_found() {
        let (controller, _) = controller();
        assert!(matches!(
            controller.get_context_health(&AgentId::from("ghost")).await,
            Err(OrchestrationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_agent_rejected() {
        let (controller, _) = controller();
        let mut bad = usage(10);
        bad.agent_id = AgentId::from(" ");
        assert!(matches!(controller.track_tokens(bad).await, Err(OrchestrationError::Validation(_))));
    }
}
