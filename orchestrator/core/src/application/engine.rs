// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Composition root of the orchestration engine.
//!
//! Wires every application service over one store bundle and one event
//! bus. The cascade worker and the proactive compaction listener are the
//! only background tasks.

use super::aggregation::AggregationEngine;
use super::batch_orchestrator::BatchOrchestrator;
use super::capacity_controller::CapacityController;
use super::cascade::{CascadeHandler, CascadeJob};
use super::decomposer::TaskDecomposer;
use super::proactive_compaction::ProactiveCompactionListener;
use super::prompt_crafter::PromptCrafter;
use super::repository_factory::Stores;
use super::snapshot_manager::SnapshotManager;
use super::subtask_service::SubtaskService;
use super::wave_scheduler::WaveScheduler;
use crate::domain::conflict::ConflictPolicy;
use crate::domain::coordination::CoordinationPort;
use crate::domain::orchestrator_config::OrchestratorConfigSpec;
use crate::domain::scope::AgentScopeRegistry;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::job_queue::{JobQueue, JobWorker};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type CascadeWorker = JobWorker<CascadeJob, CascadeHandler>;

#[derive(Clone)]
pub struct Conductor {
    pub stores: Stores,
    pub event_bus: Arc<EventBus>,
    pub scheduler: Arc<WaveScheduler>,
    pub decomposer: Arc<TaskDecomposer>,
    pub prompts: Arc<PromptCrafter>,
    pub batches: Arc<BatchOrchestrator>,
    pub aggregation: Arc<AggregationEngine>,
    pub capacity: Arc<CapacityController>,
    pub snapshots: Arc<SnapshotManager>,
    pub subtasks: Arc<SubtaskService>,
    pub proactive: Option<Arc<ProactiveCompactionListener>>,
}

impl Conductor {
    /// Build the engine. The returned worker drains the cascade queue and
    /// must be started (or drained in tests) for cascades to run.
    pub fn new(
        stores: Stores,
        spec: &OrchestratorConfigSpec,
        event_bus: Arc<EventBus>,
        coordination: Arc<dyn CoordinationPort>,
        scopes: Arc<dyn AgentScopeRegistry>,
    ) -> (Self, CascadeWorker) {
        let decomposer = Arc::new(TaskDecomposer::default());
        let scheduler = Arc::new(WaveScheduler::new(
            stores.requests.clone(),
            stores.waves.clone(),
            event_bus.clone(),
        ));
        let aggregation = Arc::new(AggregationEngine::new(
            stores.batches.clone(),
            stores.subtasks.clone(),
            stores.requests.clone(),
            event_bus.clone(),
            ConflictPolicy::default(),
        ));
        let prompts = Arc::new(PromptCrafter::new(
            scopes,
            stores.requests.clone(),
            stores.waves.clone(),
            stores.subtasks.clone(),
            decomposer.complexity_policy().clone(),
        ));
        let batches = Arc::new(BatchOrchestrator::new(
            stores.batches.clone(),
            stores.subtasks.clone(),
            scheduler.clone(),
            aggregation.clone(),
            event_bus.clone(),
        ));
        let capacity = Arc::new(CapacityController::new(
            stores.capacity.clone(),
            spec.capacity.clone(),
            event_bus.clone(),
        ));
        let snapshots = Arc::new(SnapshotManager::new(
            &stores,
            scheduler.clone(),
            capacity.clone(),
            coordination.clone(),
            event_bus.clone(),
            spec.compaction.default_restore_max_tokens,
        ));

        let handler = Arc::new(CascadeHandler::new(
            scheduler.clone(),
            aggregation.clone(),
            stores.batches.clone(),
            stores.contexts.clone(),
            coordination.clone(),
        ));
        let (jobs, worker) = JobQueue::new(spec.jobs.queue_capacity, handler);
        let subtasks = Arc::new(SubtaskService::new(
            stores.subtasks.clone(),
            scheduler.clone(),
            jobs,
            event_bus.clone(),
        ));

        let proactive = spec.compaction.proactive_enabled.then(|| {
            Arc::new(ProactiveCompactionListener::new(
                snapshots.clone(),
                capacity.clone(),
                coordination,
                event_bus.clone(),
            ))
        });

        let conductor = Self {
            stores,
            event_bus,
            scheduler,
            decomposer,
            prompts,
            batches,
            aggregation,
            capacity,
            snapshots,
            subtasks,
            proactive,
        };
        (conductor, worker)
    }

    /// Spawn the cascade worker and, when enabled, the proactive compaction
    /// listener. Both stop when `shutdown` is cancelled.
    pub fn start_background(&self, worker: CascadeWorker, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![worker.start(shutdown.clone())];
        if let Some(listener) = &self.proactive {
            handles.push(listener.clone().start(shutdown));
        }
        info!(tasks = handles.len(), "Background tasks started");
        handles
    }
}
