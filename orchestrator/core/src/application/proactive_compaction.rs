// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Proactive Compaction Listener
//!
//! Subscribes to capacity warnings. When an agent reaches the red zone and
//! its cooldown has passed, a snapshot of the live session is saved on its
//! behalf and the agent is asked to compact. Failures are logged and the
//! listener keeps running.

use super::capacity_controller::CapacityController;
use super::snapshot_manager::SnapshotManager;
use crate::domain::agent::AgentId;
use crate::domain::capacity::Zone;
use crate::domain::coordination::CoordinationPort;
use crate::domain::error::OrchestrationResult;
use crate::domain::events::CapacityEvent;
use crate::domain::session::SessionId;
use crate::domain::snapshot::{Snapshot, SnapshotTrigger};
use crate::infrastructure::event_bus::{DomainEvent, EventBus, EventBusError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ProactiveCompactionListener {
    snapshots: Arc<SnapshotManager>,
    capacity: Arc<CapacityController>,
    coordination: Arc<dyn CoordinationPort>,
    event_bus: Arc<EventBus>,
    /// Last proactive save per agent. Saves stay gated until the agent
    /// compacts and its cooldown passes again.
    last_saved: Mutex<HashMap<AgentId, DateTime<Utc>>>,
}

impl ProactiveCompactionListener {
    pub fn new(
        snapshots: Arc<SnapshotManager>,
        capacity: Arc<CapacityController>,
        coordination: Arc<dyn CoordinationPort>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            snapshots,
            capacity,
            coordination,
            event_bus,
            last_saved: Mutex::new(HashMap::new()),
        }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        info!("Starting proactive compaction listener");
        tokio::spawn(async move {
            let mut receiver = self.event_bus.subscribe();
            let mut saved = 0u64;
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = receiver.recv() => event,
                };
                match event {
                    Ok(event) => match self.handle(&event).await {
                        Ok(Some(_)) => saved += 1,
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "Proactive compaction failed"),
                    },
                    Err(EventBusError::Lagged(n)) => {
                        warn!(skipped = n, "Proactive compaction listener lagged");
                    }
                    Err(EventBusError::Closed) => break,
                    Err(EventBusError::Empty) => {}
                }
            }
            info!(snapshots_saved = saved, "Proactive compaction listener stopped");
        })
    }

    /// React to one event. Returns the snapshot when one was saved.
    pub async fn handle(&self, event: &DomainEvent) -> OrchestrationResult<Option<Snapshot>> {
        let DomainEvent::Capacity(CapacityEvent::CapacityWarning {
            agent_id,
            session_id,
            zone,
            ..
        }) = event
        else {
            return Ok(None);
        };
        if *zone < Zone::Red {
            return Ok(None);
        }

        let now = Utc::now();
        let policy = self.capacity.policy();
        let capacity = self.capacity.get_capacity(agent_id).await?;
        if !capacity.should_compact(policy, now) {
            debug!(agent_id = %agent_id, "Compaction cooldown active");
            return Ok(None);
        }
        if !self.claim(agent_id, capacity.last_compact_at, now) {
            debug!(agent_id = %agent_id, "Proactive snapshot already saved");
            return Ok(None);
        }

        let snapshot = self.save_for(agent_id, session_id).await?;
        if let Err(e) = self
            .coordination
            .request_compaction(agent_id, session_id, snapshot.id)
            .await
        {
            warn!(agent_id = %agent_id, error = %e, "Compaction request not delivered");
        }
        Ok(Some(snapshot))
    }

    /// Reserve the save for `agent`. A reservation made after the agent's
    /// last compaction blocks further saves.
    fn claim(&self, agent: &AgentId, last_compact_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let mut last_saved = self.last_saved.lock();
        if let Some(saved_at) = last_saved.get(agent) {
            if last_compact_at.is_none_or(|compacted| *saved_at > compacted) {
                return false;
            }
        }
        last_saved.insert(agent.clone(), now);
        true
    }

    async fn save_for(&self, agent: &AgentId, session: &SessionId) -> OrchestrationResult<Snapshot> {
        let content = self.snapshots.capture_live(session).await;
        let snapshot = self.snapshots.save(session, SnapshotTrigger::Proactive, content).await?;
        info!(
            agent_id = %agent,
            session_id = %session,
            snapshot_id = %snapshot.id,
            "Proactive snapshot saved"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repository_factory::Stores;
    use crate::application::wave_scheduler::WaveScheduler;
    use crate::domain::capacity::{CapacityPolicy, TokenUsage};
    use crate::domain::coordination::NoopCoordination;

    struct Fixture {
        stores: Stores,
        capacity: Arc<CapacityController>,
        listener: ProactiveCompactionListener,
        bus: Arc<EventBus>,
    }

    fn fixture() -> Fixture {
        let stores = Stores::in_memory();
        let bus = Arc::new(EventBus::with_default_capacity());
        let scheduler = Arc::new(WaveScheduler::new(stores.requests.clone(), stores.waves.clone(), bus.clone()));
        let capacity = Arc::new(CapacityController::new(
            stores.capacity.clone(),
            CapacityPolicy::default(),
            bus.clone(),
        ));
        let snapshots = Arc::new(SnapshotManager::new(
            &stores,
            scheduler,
            capacity.clone(),
            Arc::new(NoopCoordination),
            bus.clone(),
            4000,
        ));
        let listener =
            ProactiveCompactionListener::new(snapshots, capacity.clone(), Arc::new(NoopCoordination), bus.clone());
        Fixture {
            stores,
            capacity,
            listener,
            bus,
        }
    }

    async fn fill_to_red(capacity: &CapacityController) {
        // Each call is capped per policy; enough calls cross the red threshold.
        for _ in 0..5 {
            capacity
                .track_tokens(TokenUsage {
                    agent_id: AgentId::from("agent-1"),
                    session_id: SessionId::from("s1"),
                    tool_name: "read_file".into(),
                    input_size: 200_000,
                    output_size: 200_000,
                })
                .await
                .unwrap();
        }
    }

    fn next_warning(receiver: &mut crate::infrastructure::event_bus::EventReceiver, at_least: Zone) -> DomainEvent {
        loop {
            let event = receiver.try_recv().unwrap();
            if let DomainEvent::Capacity(CapacityEvent::CapacityWarning { zone, .. }) = &event {
                if *zone >= at_least {
                    return event;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_red_warning_saves_one_proactive_snapshot() {
        let f = fixture();
        let mut receiver = f.bus.subscribe();
        fill_to_red(&f.capacity).await;
        let warning = next_warning(&mut receiver, Zone::Red);

        let snapshot = f.listener.handle(&warning).await.unwrap().unwrap();
        assert_eq!(snapshot.trigger, SnapshotTrigger::Proactive);
        assert_eq!(f.stores.snapshots.count(&SessionId::from("s1")).await.unwrap(), 1);

        // Same warning again before the agent compacts: no second snapshot.
        assert!(f.listener.handle(&warning).await.unwrap().is_none());
        assert_eq!(f.stores.snapshots.count(&SessionId::from("s1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ignores_events_below_red() {
        let f = fixture();
        let event = DomainEvent::Capacity(CapacityEvent::CapacityWarning {
            agent_id: AgentId::from("agent-1"),
            session_id: SessionId::from("s1"),
            zone: Zone::Orange,
            usage_percent: 65.0,
            current_usage: 130_000,
            max_capacity: 200_000,
            predicted_exhaustion_minutes: None,
            at: Utc::now(),
        });
        assert!(f.listener.handle(&event).await.unwrap().is_none());
        assert_eq!(f.stores.snapshots.count(&SessionId::from("s1")).await.unwrap(), 0);
    }
}
