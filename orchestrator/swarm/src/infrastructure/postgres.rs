// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL coordination store over the `agent_messages`,
//! `agent_subscriptions` and `agent_blocking` tables.

use crate::domain::blocking::{BlockUpsert, BlockingRelation};
use crate::domain::message::{FetchQuery, Message, MessageId, MessagePayload, MessageTopic, Priority};
use crate::domain::repository::{BlockingRepository, MessageRepository, SubscriptionRepository};
use crate::domain::subscription::Subscription;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::domain::agent::AgentId;
use conductor_core::domain::repository::RepositoryError;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

#[derive(Clone)]
pub struct PostgresSwarmStore {
    pool: PgPool,
}

impl PostgresSwarmStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const MESSAGE_COLUMNS: &str =
    "id, from_agent, to_agent, topic, payload, priority, read_by, seq, created_at, expires_at";

fn message_from_row(row: &PgRow) -> Result<Message, RepositoryError> {
    let topic: MessageTopic = row
        .try_get::<&str, _>("topic")?
        .parse()
        .map_err(RepositoryError::Serialization)?;
    let priority = Priority::try_from(row.try_get::<i16, _>("priority")? as u8).map_err(RepositoryError::Serialization)?;
    let payload: serde_json::Value = row.try_get("payload")?;
    let read_by: Vec<String> = row.try_get("read_by")?;
    Ok(Message {
        id: MessageId(row.try_get("id")?),
        from: AgentId(row.try_get("from_agent")?),
        to: row.try_get::<Option<String>, _>("to_agent")?.map(AgentId),
        topic,
        payload: serde_json::from_value::<MessagePayload>(payload)?,
        priority,
        read_by: read_by.into_iter().map(AgentId).collect(),
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription, RepositoryError> {
    Ok(Subscription {
        id: row.try_get("id")?,
        agent_id: AgentId(row.try_get("agent_id")?),
        topic: row
            .try_get::<&str, _>("topic")?
            .parse()
            .map_err(RepositoryError::Serialization)?,
        created_at: row.try_get("created_at")?,
    })
}

fn relation_from_row(row: &PgRow) -> Result<BlockingRelation, RepositoryError> {
    Ok(BlockingRelation {
        id: row.try_get("id")?,
        blocker: AgentId(row.try_get("blocked_by")?),
        blocked: AgentId(row.try_get("blocked_agent")?),
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl MessageRepository for PostgresSwarmStore {
    async fn insert(&self, message: &Message) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO agent_messages (id, from_agent, to_agent, topic, payload, priority, read_by, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.id.0)
        .bind(message.from.as_str())
        .bind(message.to.as_ref().map(AgentId::as_str))
        .bind(message.topic.as_str())
        .bind(serde_json::to_value(&message.payload)?)
        .bind(message.priority.level() as i16)
        .bind(message.read_by.iter().map(|a| a.0.clone()).collect::<Vec<_>>())
        .bind(message.created_at)
        .bind(message.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_and_mark(
        &self,
        agent: &AgentId,
        query: &FetchQuery,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Message>, u64), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            WITH page AS (
                SELECT id FROM agent_messages
                WHERE expires_at > $2
                  AND (to_agent = $1 OR ($3 AND to_agent IS NULL))
                  AND ($4::timestamptz IS NULL OR created_at > $4)
                  AND ($5::text IS NULL OR topic = $5)
                ORDER BY priority DESC, created_at ASC, seq ASC
                LIMIT $6
                FOR UPDATE
            )
            UPDATE agent_messages m
            SET read_by = CASE WHEN $1 = ANY(m.read_by) THEN m.read_by ELSE array_append(m.read_by, $1) END
            FROM page
            WHERE m.id = page.id
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
                .split(", ")
                .map(|c| format!("m.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(agent.as_str())
            .bind(now)
            .bind(query.include_broadcasts)
            .bind(query.since)
            .bind(query.topic.map(MessageTopic::as_str))
            .bind(query.limit as i64)
            .fetch_all(&mut *tx)
            .await?;

        // RETURNING does not preserve the page order.
        let mut page = rows
            .iter()
            .map(|row| Ok((row.try_get::<i64, _>("seq")?, message_from_row(row)?)))
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        page.sort_by(|(seq_a, a), (seq_b, b)| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(seq_a.cmp(seq_b))
        });

        let unread: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM agent_messages
            WHERE expires_at > $2
              AND (to_agent = $1 OR ($3 AND to_agent IS NULL))
              AND NOT ($1 = ANY(read_by))
            "#,
        )
        .bind(agent.as_str())
        .bind(now)
        .bind(query.include_broadcasts)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((page.into_iter().map(|(_, m)| m).collect(), unread.max(0) as u64))
    }

    async fn unread_for(&self, agent: &AgentId, now: DateTime<Utc>, limit: u32) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM agent_messages
            WHERE expires_at > $2
              AND (to_agent = $1 OR to_agent IS NULL)
              AND NOT ($1 = ANY(read_by))
            ORDER BY priority DESC, created_at ASC, seq ASC
            LIMIT $3
            "#
        ))
        .bind(agent.as_str())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM agent_messages WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSwarmStore {
    async fn upsert(&self, subscription: &Subscription) -> Result<Subscription, RepositoryError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(
            r#"
            INSERT INTO agent_subscriptions (id, agent_id, topic, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (agent_id, topic) DO UPDATE SET topic = EXCLUDED.topic
            RETURNING id, agent_id, topic, created_at
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.agent_id.as_str())
        .bind(subscription.topic.as_str())
        .bind(subscription.created_at)
        .fetch_one(&self.pool)
        .await?;
        subscription_from_row(&row)
    }

    async fn delete(&self, agent: &AgentId, topic: MessageTopic) -> Result<Option<Subscription>, RepositoryError> {
        let row = sqlx::query(
            "DELETE FROM agent_subscriptions WHERE agent_id = $1 AND topic = $2 RETURNING id, agent_id, topic, created_at",
        )
        .bind(agent.as_str())
        .bind(topic.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<Subscription>, RepositoryError> {
        let row = sqlx::query("DELETE FROM agent_subscriptions WHERE id = $1 RETURNING id, agent_id, topic, created_at")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn list_for_agent(&self, agent: &AgentId) -> Result<Vec<Subscription>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, agent_id, topic, created_at FROM agent_subscriptions WHERE agent_id = $1 ORDER BY topic",
        )
        .bind(agent.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn subscribers(&self, topic: MessageTopic) -> Result<Vec<AgentId>, RepositoryError> {
        let agents: Vec<String> = sqlx::query_scalar("SELECT agent_id FROM agent_subscriptions WHERE topic = $1")
            .bind(topic.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(agents.into_iter().map(AgentId).collect())
    }
}

const RELATION_COLUMNS: &str = "id, blocked_by, blocked_agent, reason, created_at, updated_at";

#[async_trait]
impl BlockingRepository for PostgresSwarmStore {
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
        // xmax = 0 only for a freshly inserted row.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO agent_blocking (id, blocked_by, blocked_agent, reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (blocked_by, blocked_agent)
            DO UPDATE SET reason = EXCLUDED.reason, updated_at = EXCLUDED.updated_at
            RETURNING {RELATION_COLUMNS}, (xmax = 0) AS inserted
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(blocker.as_str())
        .bind(blocked.as_str())
        .bind(reason)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Ok(BlockUpsert {
            relation: relation_from_row(&row)?,
            created: row.try_get("inserted")?,
        })
    }

    async fn find(&self, blocker: &AgentId, blocked: &AgentId) -> Result<Option<BlockingRelation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RELATION_COLUMNS} FROM agent_blocking WHERE blocked_by = $1 AND blocked_agent = $2"
        ))
        .bind(blocker.as_str())
        .bind(blocked.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(relation_from_row).transpose()
    }

    async fn delete(&self, blocker: &AgentId, blocked: &AgentId) -> Result<Option<BlockingRelation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "DELETE FROM agent_blocking WHERE blocked_by = $1 AND blocked_agent = $2 RETURNING {RELATION_COLUMNS}"
        ))
        .bind(blocker.as_str())
        .bind(blocked.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(relation_from_row).transpose()
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<BlockingRelation>, RepositoryError> {
        let row = sqlx::query(&format!("DELETE FROM agent_blocking WHERE id = $1 RETURNING {RELATION_COLUMNS}"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(relation_from_row).transpose()
    }

    async fn blockers_of(&self, agent: &AgentId) -> Result<Vec<BlockingRelation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RELATION_COLUMNS} FROM agent_blocking WHERE blocked_agent = $1 ORDER BY created_at"
        ))
        .bind(agent.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(relation_from_row).collect()
    }

    async fn blocked_by(&self, agent: &AgentId) -> Result<Vec<BlockingRelation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RELATION_COLUMNS} FROM agent_blocking WHERE blocked_by = $1 ORDER BY created_at"
        ))
        .bind(agent.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(relation_from_row).collect()
    }
}
