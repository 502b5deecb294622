// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared handler state: the orchestration engine and the coordination
//! services, wired over one event bus.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;

use conductor_core::application::{create_stores, CascadeWorker, Conductor, Stores};
use conductor_core::domain::orchestrator_config::OrchestratorConfigSpec;
use conductor_core::infrastructure::db::Database;
use conductor_core::infrastructure::event_bus::EventBus;
use conductor_core::infrastructure::scope_registry::StaticScopeRegistry;
use conductor_swarm::application::SwarmServices;

#[derive(Clone)]
pub struct AppState {
    pub conductor: Conductor,
    pub swarm: SwarmServices,
    pub start_time: Instant,
}

impl AppState {
    /// Build every service for the configured storage backend. The returned
    /// worker drains cascades and must be started by the caller.
    pub async fn from_config(spec: &OrchestratorConfigSpec) -> Result<(Self, CascadeWorker)> {
        let (stores, database) = create_stores(&spec.storage).await?;
        Ok(Self::assemble(stores, database.as_ref(), spec))
    }

    /// In-memory wiring, used by tests and `storage.backend: in_memory`.
    pub fn in_memory(spec: &OrchestratorConfigSpec) -> (Self, CascadeWorker) {
        Self::assemble(Stores::in_memory(), None, spec)
    }

    fn assemble(stores: Stores, database: Option<&Database>, spec: &OrchestratorConfigSpec) -> (Self, CascadeWorker) {
        let event_bus = Arc::new(EventBus::new(spec.events.channel_capacity));
        let swarm = match database {
            Some(database) => SwarmServices::postgres(database, event_bus.clone(), spec.messaging.clone()),
            None => SwarmServices::in_memory(event_bus.clone(), spec.messaging.clone()),
        };
        let (conductor, worker) = Conductor::new(
            stores,
            spec,
            event_bus,
            swarm.coordination.clone(),
            Arc::new(StaticScopeRegistry::new()),
        );
        let state = Self {
            conductor,
            swarm,
            start_time: Instant::now(),
        };
        (state, worker)
    }
}
