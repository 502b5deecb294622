// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use super::message::MessageTopic;
use chrono::{DateTime, Utc};
use conductor_core::domain::agent::AgentId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An agent's interest in a topic. Unique per `(agent_id, topic)`.
///
/// Subscribers of a topic join the live-notification audience of broadcasts
/// on it. What `fetch` returns does not depend on subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub topic: MessageTopic,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(agent_id: AgentId, topic: MessageTopic) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            topic,
            created_at: Utc::now(),
        }
    }
}
