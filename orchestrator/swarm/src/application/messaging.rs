// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Messaging Bus Application Service
//!
//! Publish, fetch-with-read-marking, topic subscriptions and the expiry
//! sweep. Every publish also goes out on the event bus so live subscribers
//! learn about it without polling.

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::message::{FetchQuery, FetchResult, Message, MessagePayload, MessageTopic, Priority};
use crate::domain::repository::{MessageRepository, SubscriptionRepository};
use crate::domain::subscription::Subscription;
use chrono::{DateTime, Duration, Utc};
use conductor_core::domain::agent::AgentId;
use conductor_core::domain::events::CoordinationEvent;
use conductor_core::domain::lookup::{DegradeExt, IntoDegraded};
use conductor_core::domain::orchestrator_config::MessagingConfig;
use conductor_core::infrastructure::event_bus::EventBus;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// One year.
const MAX_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct PublishMessage {
    pub from: AgentId,
    #[serde(default)]
    pub to: Option<AgentId>,
    pub topic: MessageTopic,
    #[serde(default = "empty_payload")]
    pub payload: MessagePayload,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

fn empty_payload() -> MessagePayload {
    MessagePayload::new(serde_json::Value::Object(Default::default()))
}

/// Raw fetch options as callers send them; see [`MessagingService::fetch`].
#[derive(Debug, Clone, Deserialize)]
pub struct FetchOptions {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub topic: Option<MessageTopic>,
    #[serde(default = "default_true")]
    pub include_broadcasts: bool,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            since: None,
            topic: None,
            include_broadcasts: true,
            limit: None,
        }
    }
}

fn default_true() -> bool {
    true
}

pub struct MessagingService {
    messages: Arc<dyn MessageRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    event_bus: Arc<EventBus>,
    config: MessagingConfig,
}

impl MessagingService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        event_bus: Arc<EventBus>,
        config: MessagingConfig,
    ) -> Self {
        Self {
            messages,
            subscriptions,
            event_bus,
            config,
        }
    }

    pub async fn publish(&self, request: PublishMessage) -> SwarmResult<Message> {
        if request.from.as_str().trim().is_empty() {
            return Err(SwarmError::Validation("from must not be empty".into()));
        }
        if request.to.as_ref().is_some_and(|to| to.as_str().trim().is_empty()) {
            return Err(SwarmError::Validation("to must be omitted for a broadcast, not empty".into()));
        }
        let ttl_seconds = request.ttl_seconds.unwrap_or(self.config.default_ttl_seconds);
        if ttl_seconds == 0 || ttl_seconds > MAX_TTL_SECONDS {
            return Err(SwarmError::Validation(format!(
                "ttl_seconds must be between 1 and {MAX_TTL_SECONDS}"
            )));
        }

        let message = Message::new(
            request.from,
            request.to,
            request.topic,
            request.payload,
            request.priority,
            Duration::seconds(ttl_seconds as i64),
        );
        self.messages.insert(&message).await?;

        let audience = self.audience(&message).await;
        info!(
            message_id = %message.id,
            from = %message.from,
            to = message.to.as_ref().map(AgentId::as_str).unwrap_or("*"),
            topic = message.topic.as_str(),
            priority = message.priority.level(),
            audience = audience.len(),
            "Message published"
        );
        metrics::counter!("conductor_messages_published_total", "topic" => message.topic.as_str()).increment(1);
        self.event_bus
            .publish_coordination_event(CoordinationEvent::MessagePublished {
                message_id: message.id.0,
                from: message.from.clone(),
                to: message.to.clone(),
                topic: message.topic.as_str().to_string(),
                priority: message.priority.level(),
                audience,
                published_at: message.created_at,
            });
        Ok(message)
    }

    /// Per-agent channels that get a live notification: the recipient of a
    /// direct message, or the topic's subscribers (minus the sender) for a
    /// broadcast. The message is already stored, so a failed subscriber
    /// lookup only narrows the notification.
    async fn audience(&self, message: &Message) -> Vec<AgentId> {
        match &message.to {
            Some(to) => vec![to.clone()],
            None => {
                let mut subscribers: Vec<AgentId> = self
                    .subscriptions
                    .subscribers(message.topic)
                    .await
                    .degrade("topic subscribers")
                    .or_degraded("publish");
                subscribers.retain(|agent| agent != &message.from);
                subscribers.sort();
                subscribers.dedup();
                subscribers
            }
        }
    }

    /// Messages for `agent` in delivery order, marked read by `agent` in the
    /// same step. `unread_count` is what remains unread afterwards.
    pub async fn fetch(&self, agent: &AgentId, options: FetchOptions) -> SwarmResult<FetchResult> {
        if agent.as_str().trim().is_empty() {
            return Err(SwarmError::Validation("agent_id must not be empty".into()));
        }
        let limit = options.limit.unwrap_or(self.config.default_limit);
        if limit == 0 {
            return Err(SwarmError::Validation("limit must be positive".into()));
        }
        let query = FetchQuery {
            since: options.since,
            topic: options.topic,
            include_broadcasts: options.include_broadcasts,
            limit: limit.min(self.config.max_limit),
        };

        let (messages, unread_count) = self.messages.fetch_and_mark(agent, &query, Utc::now()).await?;
        debug!(agent_id = %agent, fetched = messages.len(), unread_count, "Messages fetched");
        Ok(FetchResult { messages, unread_count })
    }

    /// Unread messages without marking them, for briefs and digests.
    pub async fn peek_unread(&self, agent: &AgentId, limit: u32) -> SwarmResult<Vec<Message>> {
        Ok(self.messages.unread_for(agent, Utc::now(), limit).await?)
    }

    pub async fn purge_expired(&self) -> SwarmResult<u64> {
        let purged = self.messages.purge_expired(Utc::now()).await?;
        if purged > 0 {
            info!(purged, "Expired messages purged");
        }
        Ok(purged)
    }

    /// Run [`Self::purge_expired`] every `purge_interval_seconds` until
    /// `shutdown` is cancelled.
    pub fn start_purge_sweep(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = std::time::Duration::from_secs(self.config.purge_interval_seconds.max(1));
        info!(interval_seconds = period.as_secs(), "Starting message purge sweep");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.purge_expired().await {
                            error!(error = %e, "Message purge failed");
                        }
                    }
                }
            }
            info!("Message purge sweep stopped");
        })
    }

    pub async fn subscribe(&self, agent: AgentId, topic: MessageTopic) -> SwarmResult<Subscription> {
        if agent.as_str().trim().is_empty() {
            return Err(SwarmError::Validation("agent_id must not be empty".into()));
        }
        let subscription = self.subscriptions.upsert(&Subscription::new(agent, topic)).await?;
        info!(agent_id = %subscription.agent_id, topic = topic.as_str(), "Subscribed");
        Ok(subscription)
    }

    pub async fn unsubscribe(&self, agent: &AgentId, topic: MessageTopic) -> SwarmResult<Subscription> {
        self.subscriptions
            .delete(agent, topic)
            .await?
            .ok_or_else(|| SwarmError::NotFound(format!("subscription of {agent} to {topic}")))
    }

    pub async fn unsubscribe_by_id(&self, id: Uuid) -> SwarmResult<Subscription> {
        self.subscriptions
            .delete_by_id(id)
            .await?
            .ok_or_else(|| SwarmError::NotFound(format!("subscription {id}")))
    }

    pub async fn subscriptions(&self, agent: &AgentId) -> SwarmResult<Vec<Subscription>> {
        Ok(self.subscriptions.list_for_agent(agent).await?)
    }
}
