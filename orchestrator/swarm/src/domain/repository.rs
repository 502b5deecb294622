// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Store ports of the coordination layer.

use super::blocking::{BlockUpsert, BlockingRelation};
use super::message::{FetchQuery, Message, MessageTopic};
use super::subscription::Subscription;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::domain::agent::AgentId;
use conductor_core::domain::repository::RepositoryError;
use uuid::Uuid;

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert(&self, message: &Message) -> Result<(), RepositoryError>;

    /// Select the page for `agent`, add `agent` to each message's `read_by`,
    /// then count what is still unread, all in one atomic step. The count
    /// covers the same addressing but ignores `since`, `topic` and `limit`.
    async fn fetch_and_mark(
        &self,
        agent: &AgentId,
        query: &FetchQuery,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Message>, u64), RepositoryError>;

    /// Unread, unexpired messages for `agent` (broadcasts included), in
    /// delivery order. Does not mark anything.
    async fn unread_for(&self, agent: &AgentId, now: DateTime<Utc>, limit: u32) -> Result<Vec<Message>, RepositoryError>;

    /// Delete expired rows. Returns how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert, or return the existing row for the same `(agent, topic)`.
    async fn upsert(&self, subscription: &Subscription) -> Result<Subscription, RepositoryError>;

    async fn delete(&self, agent: &AgentId, topic: MessageTopic) -> Result<Option<Subscription>, RepositoryError>;

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<Subscription>, RepositoryError>;

    async fn list_for_agent(&self, agent: &AgentId) -> Result<Vec<Subscription>, RepositoryError>;

    async fn subscribers(&self, topic: MessageTopic) -> Result<Vec<AgentId>, RepositoryError>;
}

#[async_trait]
pub trait BlockingRepository: Send + Sync {
    /// Insert the pair, or update the reason of the existing one.
    async fn upsert(
        &self,
        blocker: &AgentId,
        blocked: &AgentId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<BlockUpsert, RepositoryError>;

    async fn find(&self, blocker: &AgentId, blocked: &AgentId) -> Result<Option<BlockingRelation>, RepositoryError>;

    async fn delete(&self, blocker: &AgentId, blocked: &AgentId) -> Result<Option<BlockingRelation>, RepositoryError>;

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<BlockingRelation>, RepositoryError>;

    /// Relations in which `agent` is the one blocked.
    async fn blockers_of(&self, agent: &AgentId) -> Result<Vec<BlockingRelation>, RepositoryError>;

    /// Relations in which `agent` is the blocker.
    async fn blocked_by(&self, agent: &AgentId) -> Result<Vec<BlockingRelation>, RepositoryError>;
}
