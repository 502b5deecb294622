// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory coordination store.
//!
//! All three tables sit behind one lock, so fetch-and-mark and the unread
//! count are observed atomically just like the Postgres transaction.

use crate::domain::blocking::{BlockUpsert, BlockingRelation};
use crate::domain::message::{delivery_order, FetchQuery, Message, MessageTopic};
use crate::domain::repository::{BlockingRepository, MessageRepository, SubscriptionRepository};
use crate::domain::subscription::Subscription;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::domain::agent::AgentId;
use conductor_core::domain::repository::RepositoryError;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    /// Insertion order is the tie-breaker after priority and creation time.
    messages: Vec<Message>,
    subscriptions: Vec<Subscription>,
    blocking: Vec<BlockingRelation>,
}

#[derive(Clone, Default)]
pub struct InMemorySwarmStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemorySwarmStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unread(messages: &[Message], agent: &AgentId, include_broadcasts: bool, now: DateTime<Utc>) -> u64 {
    messages
        .iter()
        .filter(|m| !m.is_expired(now) && m.is_addressed_to(agent, include_broadcasts) && !m.is_read_by(agent))
        .count() as u64
}

#[async_trait]
impl MessageRepository for InMemorySwarmStore {
    async fn insert(&self, message: &Message) -> Result<(), RepositoryError> {
        self.tables.write().messages.push(message.clone());
        Ok(())
    }

    async fn fetch_and_mark(
        &self,
        agent: &AgentId,
        query: &FetchQuery,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Message>, u64), RepositoryError> {
        let mut tables = self.tables.write();
        let mut page: Vec<usize> = tables
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| query.matches(m, agent, now))
            .map(|(i, _)| i)
            .collect();
        page.sort_by(|&a, &b| delivery_order(&tables.messages[a], &tables.messages[b]));
        page.truncate(query.limit as usize);

        let mut fetched = Vec::with_capacity(page.len());
        for index in page {
            let message = &mut tables.messages[index];
            message.mark_read(agent);
            fetched.push(message.clone());
        }
        let remaining = unread(&tables.messages, agent, query.include_broadcasts, now);
        Ok((fetched, remaining))
    }

    async fn unread_for(&self, agent: &AgentId, now: DateTime<Utc>, limit: u32) -> Result<Vec<Message>, RepositoryError> {
        let tables = self.tables.read();
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| !m.is_expired(now) && m.is_addressed_to(agent, true) && !m.is_read_by(agent))
            .cloned()
            .collect();
        messages.sort_by(delivery_order);
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write();
        let before = tables.messages.len();
        tables.messages.retain(|m| !m.is_expired(now));
        Ok((before - tables.messages.len()) as u64)
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySwarmStore {
    async fn upsert(&self, subscription: &Subscription) -> Result<Subscription, RepositoryError> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables
            .subscriptions
            .iter()
            .find(|s| s.agent_id == subscription.agent_id && s.topic == subscription.topic)
        {
            return Ok(existing.clone());
        }
        tables.subscriptions.push(subscription.clone());
        Ok(subscription.clone())
    }

    async fn delete(&self, agent: &AgentId, topic: MessageTopic) -> Result<Option<Subscription>, RepositoryError> {
        let mut tables = self.tables.write();
        let position = tables
            .subscriptions
            .iter()
            .position(|s| &s.agent_id == agent && s.topic == topic);
        Ok(position.map(|i| tables.subscriptions.remove(i)))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<Subscription>, RepositoryError> {
        let mut tables = self.tables.write();
        let position = tables.subscriptions.iter().position(|s| s.id == id);
        Ok(position.map(|i| tables.subscriptions.remove(i)))
    }

    async fn list_for_agent(&self, agent: &AgentId) -> Result<Vec<Subscription>, RepositoryError> {
        let mut subscriptions: Vec<Subscription> = self
            .tables
            .read()
            .subscriptions
            .iter()
            .filter(|s| &s.agent_id == agent)
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.topic);
        Ok(subscriptions)
    }

    async fn subscribers(&self, topic: MessageTopic) -> Result<Vec<AgentId>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .subscriptions
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| s.agent_id.clone())
            .collect())
    }
}

#[async_trait]
impl BlockingRepository for InMemorySwarmStore {
    async fn upsert(
        &self,
        blocker: &AgentId,
        blocked: &AgentId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<BlockUpsert, RepositoryError> {
        if blocker == blocked {
            return Err(RepositoryError::Conflict(format!("{blocker} cannot block itself")));
        }
        let mut tables = self.tables.write();
        if let Some(existing) = tables
            .blocking
            .iter_mut()
            .find(|r| &r.blocker == blocker && &r.blocked == blocked)
        {
            existing.reason = reason.to_string();
            existing.updated_at = at;
            return Ok(BlockUpsert {
                relation: existing.clone(),
                created: false,
            });
        }
        let mut relation = BlockingRelation::new(blocker.clone(), blocked.clone(), reason);
        relation.created_at = at;
        relation.updated_at = at;
        tables.blocking.push(relation.clone());
        Ok(BlockUpsert { relation, created: true })
    }

    async fn find(&self, blocker: &AgentId, blocked: &AgentId) -> Result<Option<BlockingRelation>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .blocking
            .iter()
            .find(|r| &r.blocker == blocker && &r.blocked == blocked)
            .cloned())
    }

    async fn delete(&self, blocker: &AgentId, blocked: &AgentId) -> Result<Option<BlockingRelation>, RepositoryError> {
        let mut tables = self.tables.write();
        let position = tables
            .blocking
            .iter()
            .position(|r| &r.blocker == blocker && &r.blocked == blocked);
        Ok(position.map(|i| tables.blocking.remove(i)))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<BlockingRelation>, RepositoryError> {
        let mut tables = self.tables.write();
        let position = tables.blocking.iter().position(|r| r.id == id);
        Ok(position.map(|i| tables.blocking.remove(i)))
    }

    async fn blockers_of(&self, agent: &AgentId) -> Result<Vec<BlockingRelation>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .blocking
            .iter()
            .filter(|r| &r.blocked == agent)
            .cloned()
            .collect())
    }

    async fn blocked_by(&self, agent: &AgentId) -> Result<Vec<BlockingRelation>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .blocking
            .iter()
            .filter(|r| &r.blocker == agent)
            .cloned()
            .collect())
    }
}
