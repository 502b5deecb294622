// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete store bundle for the configured storage backend so
//! the services only ever see the domain traits.

use std::sync::Arc;

use crate::domain::orchestrator_config::{StorageBackend, StorageConfig};
use crate::domain::repository::{
    AgentContextRepository, BatchRepository, CapacityRepository, CompactionLedger, RequestRepository,
    SessionRepository, SnapshotRepository, SubtaskRepository, WaveRepository,
};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{InMemoryStore, PostgresStore};
use tracing::info;

/// Every store port the engine needs, backed by one implementation.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionRepository>,
    pub requests: Arc<dyn RequestRepository>,
    pub waves: Arc<dyn WaveRepository>,
    pub batches: Arc<dyn BatchRepository>,
    pub subtasks: Arc<dyn SubtaskRepository>,
    pub capacity: Arc<dyn CapacityRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub contexts: Arc<dyn AgentContextRepository>,
    pub compaction: Arc<dyn CompactionLedger>,
}

impl Stores {
    fn from_store<S>(store: S) -> Self
    where
        S: SessionRepository
            + RequestRepository
            + WaveRepository
            + BatchRepository
            + SubtaskRepository
            + CapacityRepository
            + SnapshotRepository
            + AgentContextRepository
            + CompactionLedger
            + 'static,
    {
        let store = Arc::new(store);
        Self {
            sessions: store.clone(),
            requests: store.clone(),
            waves: store.clone(),
            batches: store.clone(),
            subtasks: store.clone(),
            capacity: store.clone(),
            snapshots: store.clone(),
            contexts: store.clone(),
            compaction: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(InMemoryStore::new())
    }

    pub fn postgres(database: &Database) -> Self {
        Self::from_store(PostgresStore::new(database.get_pool().clone()))
    }
}

/// Open the configured backend. Postgres connects and applies migrations;
/// the returned [`Database`] is shared with the swarm stores.
pub async fn create_stores(config: &StorageConfig) -> anyhow::Result<(Stores, Option<Database>)> {
    match config.backend {
        StorageBackend::InMemory => {
            info!("Using in-memory storage backend");
            Ok((Stores::in_memory(), None))
        }
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("storage.database_url is required for the postgres backend"))?;
            let database = Database::new(url, config.max_connections).await?;
            database.migrate().await?;
            info!("Using PostgreSQL storage backend");
            Ok((Stores::postgres(&database), Some(database)))
        }
    }
}
