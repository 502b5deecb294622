// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Service bundle for the coordination layer, built over one store.

use super::blocking::BlockingCoordinator;
use super::coordination::SwarmCoordination;
use super::messaging::MessagingService;
use crate::domain::repository::{BlockingRepository, MessageRepository, SubscriptionRepository};
use crate::infrastructure::{InMemorySwarmStore, PostgresSwarmStore};
use conductor_core::domain::orchestrator_config::MessagingConfig;
use conductor_core::infrastructure::db::Database;
use conductor_core::infrastructure::event_bus::EventBus;
use std::sync::Arc;

#[derive(Clone)]
pub struct SwarmServices {
    pub messaging: Arc<MessagingService>,
    pub blocking: Arc<BlockingCoordinator>,
    /// The same services behind the core's coordination port.
    pub coordination: Arc<SwarmCoordination>,
}

impl SwarmServices {
    pub fn new<S>(store: S, event_bus: Arc<EventBus>, config: MessagingConfig) -> Self
    where
        S: MessageRepository + SubscriptionRepository + BlockingRepository + 'static,
    {
        let store = Arc::new(store);
        let messaging = Arc::new(MessagingService::new(
            store.clone(),
            store.clone(),
            event_bus.clone(),
            config,
        ));
        let blocking = Arc::new(BlockingCoordinator::new(store, event_bus));
        let coordination = Arc::new(SwarmCoordination::new(messaging.clone(), blocking.clone()));
        Self {
            messaging,
            blocking,
            coordination,
        }
    }

    pub fn in_memory(event_bus: Arc<EventBus>, config: MessagingConfig) -> Self {
        Self::new(InMemorySwarmStore::new(), event_bus, config)
    }

    pub fn postgres(database: &Database, event_bus: Arc<EventBus>, config: MessagingConfig) -> Self {
        Self::new(PostgresSwarmStore::new(database.get_pool().clone()), event_bus, config)
    }
}
