// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL store: capacity, token ledger, snapshots, agent contexts and
//! the compaction ledger.

use super::postgres::{ensure_session, parse_enum, session_from_row, PostgresStore};
use crate::domain::agent::{AgentContext, AgentId};
use crate::domain::capacity::{AgentCapacity, CapacityPolicy, TokenLedgerEntry, TokenUsage};
use crate::domain::repository::{
    AgentContextRepository, CapacityRepository, CompactionLedger, CompactionRecord, RepositoryError,
    SnapshotRepository,
};
use crate::domain::session::SessionId;
use crate::domain::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

const CAPACITY_COLUMNS: &str = "agent_id, session_id, current_usage, max_capacity, consumption_rate, \
     usage_percent, zone, predicted_exhaustion_minutes, compact_count, last_compact_at, created_at, updated_at";

fn capacity_from_row(row: &PgRow) -> Result<AgentCapacity, RepositoryError> {
    Ok(AgentCapacity {
        agent_id: AgentId(row.try_get("agent_id")?),
        session_id: row.try_get::<Option<String>, _>("session_id")?.map(SessionId),
        current_usage: row.try_get::<i64, _>("current_usage")? as u64,
        max_capacity: row.try_get::<i64, _>("max_capacity")? as u64,
        consumption_rate: row.try_get("consumption_rate")?,
        usage_percent: row.try_get("usage_percent")?,
        zone: parse_enum(row.try_get::<&str, _>("zone")?)?,
        predicted_exhaustion_minutes: row.try_get("predicted_exhaustion_minutes")?,
        compact_count: row.try_get::<i32, _>("compact_count")? as u32,
        last_compact_at: row.try_get("last_compact_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn ledger_from_row(row: &PgRow) -> Result<TokenLedgerEntry, RepositoryError> {
    Ok(TokenLedgerEntry {
        id: row.try_get("id")?,
        agent_id: AgentId(row.try_get("agent_id")?),
        session_id: SessionId(row.try_get("session_id")?),
        tool_name: row.try_get("tool_name")?,
        input_size: row.try_get::<i64, _>("input_size")? as u64,
        output_size: row.try_get::<i64, _>("output_size")? as u64,
        tokens: row.try_get::<i64, _>("tokens")? as u64,
        usage_after: row.try_get::<i64, _>("usage_after")? as u64,
        zone_after: parse_enum(row.try_get::<&str, _>("zone_after")?)?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

async fn lock_capacity(conn: &mut PgConnection, agent: &AgentId) -> Result<Option<AgentCapacity>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {CAPACITY_COLUMNS} FROM agent_capacity WHERE agent_id = $1 FOR UPDATE"
    ))
    .bind(agent.as_str())
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(capacity_from_row).transpose()
}

async fn write_capacity(conn: &mut PgConnection, capacity: &AgentCapacity) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        UPDATE agent_capacity SET
            session_id = $2,
            current_usage = $3,
            consumption_rate = $4,
            usage_percent = $5,
            zone = $6,
            predicted_exhaustion_minutes = $7,
            compact_count = $8,
            last_compact_at = $9,
            updated_at = $10
        WHERE agent_id = $1
        "#,
    )
    .bind(capacity.agent_id.as_str())
    .bind(capacity.session_id.as_ref().map(|s| s.as_str()))
    .bind(capacity.current_usage as i64)
    .bind(capacity.consumption_rate)
    .bind(capacity.usage_percent)
    .bind(capacity.zone.as_str())
    .bind(capacity.predicted_exhaustion_minutes)
    .bind(capacity.compact_count as i32)
    .bind(capacity.last_compact_at)
    .bind(capacity.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn reset_locked(
    conn: &mut PgConnection,
    agent: &AgentId,
    policy: &CapacityPolicy,
    at: DateTime<Utc>,
) -> Result<Option<(u64, AgentCapacity)>, RepositoryError> {
    let Some(mut capacity) = lock_capacity(&mut *conn, agent).await? else {
        return Ok(None);
    };
    let before = capacity.current_usage;
    capacity.apply_compaction(policy, at);
    write_capacity(conn, &capacity).await?;
    Ok(Some((before, capacity)))
}

#[async_trait]
impl CapacityRepository for PostgresStore {
    async fn record_usage(
        &self,
        usage: &TokenUsage,
        tokens: u64,
        policy: &CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<(AgentCapacity, TokenLedgerEntry), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO agent_capacity (agent_id, session_id, max_capacity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (agent_id) DO NOTHING
            "#,
        )
        .bind(usage.agent_id.as_str())
        .bind(usage.session_id.as_str())
        .bind(policy.max_capacity as i64)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        let mut capacity = lock_capacity(&mut tx, &usage.agent_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("capacity for agent {}", usage.agent_id)))?;
        capacity.session_id = Some(usage.session_id.clone());
        capacity.record_usage(tokens, policy, at);
        write_capacity(&mut tx, &capacity).await?;

        let entry = TokenLedgerEntry {
            id: Uuid::new_v4(),
            agent_id: usage.agent_id.clone(),
            session_id: usage.session_id.clone(),
            tool_name: usage.tool_name.clone(),
            input_size: usage.input_size,
            output_size: usage.output_size,
            tokens,
            usage_after: capacity.current_usage,
            zone_after: capacity.zone,
            recorded_at: at,
        };
        sqlx::query(
            r#"
            INSERT INTO token_ledger (id, agent_id, session_id, tool_name, input_size, output_size,
                                      tokens, usage_after, zone_after, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.agent_id.as_str())
        .bind(entry.session_id.as_str())
        .bind(&entry.tool_name)
        .bind(entry.input_size as i64)
        .bind(entry.output_size as i64)
        .bind(entry.tokens as i64)
        .bind(entry.usage_after as i64)
        .bind(entry.zone_after.as_str())
        .bind(entry.recorded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((capacity, entry))
    }

    async fn find(&self, agent: &AgentId) -> Result<Option<AgentCapacity>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CAPACITY_COLUMNS} FROM agent_capacity WHERE agent_id = $1"))
            .bind(agent.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(capacity_from_row).transpose()
    }

    async fn reset(
        &self,
        agent: &AgentId,
        policy: &CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<Option<(u64, AgentCapacity)>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let outcome = reset_locked(&mut tx, agent, policy, at).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn ledger(&self, agent: &AgentId, limit: usize) -> Result<Vec<TokenLedgerEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, agent_id, session_id, tool_name, input_size, output_size,
                   tokens, usage_after, zone_after, recorded_at
            FROM token_ledger
            WHERE agent_id = $1
            ORDER BY recorded_at DESC
            LIMIT $2
            "#,
        )
        .bind(agent.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ledger_from_row).collect()
    }
}

#[async_trait]
impl SnapshotRepository for PostgresStore {
    async fn append(&self, snapshot: &Snapshot) -> Result<(), RepositoryError> {
        let body = serde_json::to_value(snapshot)?;
        let mut tx = self.pool.begin().await?;
        ensure_session(&mut tx, &snapshot.session_id).await?;

        sqlx::query(
            r#"
            INSERT INTO compact_snapshots (id, session_id, request_id, trigger, snapshot, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(snapshot.id.0)
        .bind(snapshot.session_id.as_str())
        .bind(snapshot.request_id.map(|r| r.0))
        .bind(snapshot.trigger.as_str())
        .bind(&body)
        .bind(snapshot.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(request) = snapshot.request_id {
            sqlx::query(
                r#"
                UPDATE requests
                SET metadata = metadata || jsonb_build_object(
                    'last_snapshot_at', $2::text,
                    'last_snapshot_trigger', $3::text
                )
                WHERE id = $1
                "#,
            )
            .bind(request.0)
            .bind(snapshot.created_at.to_rfc3339())
            .bind(snapshot.trigger.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn latest(&self, session: &SessionId) -> Result<Option<Snapshot>, RepositoryError> {
        let row = sqlx::query(
            "SELECT snapshot FROM compact_snapshots WHERE session_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(session.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let body: serde_json::Value = row.try_get("snapshot")?;
                Ok(Some(serde_json::from_value(body)?))
            }
            None => Ok(None),
        }
    }

    async fn count(&self, session: &SessionId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM compact_snapshots WHERE session_id = $1")
            .bind(session.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl AgentContextRepository for PostgresStore {
    async fn upsert(&self, context: &AgentContext) -> Result<(), RepositoryError> {
        let body = serde_json::to_value(context)?;
        sqlx::query(
            r#"
            INSERT INTO agent_contexts (session_id, agent_id, context, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, agent_id)
            DO UPDATE SET context = EXCLUDED.context, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(context.session_id.as_str())
        .bind(context.agent_id.as_str())
        .bind(&body)
        .bind(context.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, session: &SessionId, agent: &AgentId) -> Result<Option<AgentContext>, RepositoryError> {
        let row = sqlx::query("SELECT context FROM agent_contexts WHERE session_id = $1 AND agent_id = $2")
            .bind(session.as_str())
            .bind(agent.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: serde_json::Value = row.try_get("context")?;
                Ok(Some(serde_json::from_value(body)?))
            }
            None => Ok(None),
        }
    }

    async fn list_for_session(&self, session: &SessionId) -> Result<Vec<AgentContext>, RepositoryError> {
        let rows = sqlx::query("SELECT context FROM agent_contexts WHERE session_id = $1 ORDER BY agent_id")
            .bind(session.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let body: serde_json::Value = row.try_get("context")?;
                Ok(serde_json::from_value(body)?)
            })
            .collect()
    }
}

#[async_trait]
impl CompactionLedger for PostgresStore {
    async fn record_compaction(
        &self,
        session: &SessionId,
        agent: &AgentId,
        policy: &CapacityPolicy,
        at: DateTime<Utc>,
    ) -> Result<CompactionRecord, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        ensure_session(&mut tx, session).await?;
        let row = sqlx::query(
            r#"
            UPDATE sessions SET compacted_at = $2, compact_count = compact_count + 1
            WHERE id = $1
            RETURNING id, status, compacted_at, compact_count, created_at, ended_at
            "#,
        )
        .bind(session.as_str())
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;
        let session_row = session_from_row(&row)?;
        let capacity = reset_locked(&mut tx, agent, policy, at).await?;
        tx.commit().await?;
        Ok(CompactionRecord {
            session: session_row,
            capacity,
        })
    }
}
