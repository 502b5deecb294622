// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL store: batches and subtasks.

use super::postgres::{ensure_session, parse_enum, upsert_wave, wave_from_row, PostgresStore, WAVE_COLUMNS};
use crate::domain::agent::AgentId;
use crate::domain::batch::{Batch, BatchId, Synthesis};
use crate::domain::repository::{
    BatchRepository, RepositoryError, SubmittedBatch, SubtaskRepository, TransitionRecord,
};
use crate::domain::session::{RequestId, SessionId};
use crate::domain::subtask::{Subtask, SubtaskId, SubtaskResult, SubtaskStatus, TransitionOutcome};
use crate::domain::wave::{Wave, WaveId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use std::collections::BTreeSet;

const BATCH_COLUMNS: &str = "id, session_id, request_id, wave_id, wave_number, name, status, total_tasks, \
     completed_tasks, failed_tasks, synthesis, created_at, completed_at";

const SUBTASK_COLUMNS: &str = "id, session_id, request_id, wave_id, wave_number, batch_id, description, \
     agent_type, agent_id, blocked_by, priority, status, result, created_at, started_at, completed_at";

fn batch_from_row(row: &PgRow) -> Result<Batch, RepositoryError> {
    let synthesis: Option<serde_json::Value> = row.try_get("synthesis")?;
    Ok(Batch {
        id: BatchId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        request_id: RequestId(row.try_get("request_id")?),
        wave_id: WaveId(row.try_get("wave_id")?),
        wave_number: row.try_get::<i32, _>("wave_number")? as u32,
        name: row.try_get("name")?,
        status: parse_enum(row.try_get::<&str, _>("status")?)?,
        total_tasks: row.try_get::<i32, _>("total_tasks")? as u32,
        completed_tasks: row.try_get::<i32, _>("completed_tasks")? as u32,
        failed_tasks: row.try_get::<i32, _>("failed_tasks")? as u32,
        synthesis: synthesis.map(serde_json::from_value).transpose()?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn subtask_from_row(row: &PgRow) -> Result<Subtask, RepositoryError> {
    let blocked_by: serde_json::Value = row.try_get("blocked_by")?;
    let blocked_by: BTreeSet<SubtaskId> = serde_json::from_value(blocked_by)?;
    let result: Option<serde_json::Value> = row.try_get("result")?;
    Ok(Subtask {
        id: SubtaskId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        request_id: RequestId(row.try_get("request_id")?),
        wave_id: WaveId(row.try_get("wave_id")?),
        wave_number: row.try_get::<i32, _>("wave_number")? as u32,
        batch_id: row.try_get::<Option<uuid::Uuid>, _>("batch_id")?.map(BatchId),
        description: row.try_get("description")?,
        agent_type: row.try_get("agent_type")?,
        agent_id: row.try_get::<Option<String>, _>("agent_id")?.map(AgentId),
        blocked_by,
        priority: row.try_get("priority")?,
        status: parse_enum(row.try_get::<&str, _>("status")?)?,
        result: result.map(SubtaskResult::from),
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

async fn insert_subtask(conn: &mut PgConnection, subtask: &Subtask) -> Result<(), RepositoryError> {
    let blocked_by = serde_json::to_value(&subtask.blocked_by)?;
    let result = subtask.result.as_ref().map(serde_json::to_value).transpose()?;
    sqlx::query(
        r#"
        INSERT INTO subtasks (id, session_id, request_id, wave_id, wave_number, batch_id, description,
                              agent_type, agent_id, blocked_by, priority, status, result,
                              created_at, started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(subtask.id.0)
    .bind(subtask.session_id.as_str())
    .bind(subtask.request_id.0)
    .bind(subtask.wave_id.0)
    .bind(subtask.wave_number as i32)
    .bind(subtask.batch_id.map(|b| b.0))
    .bind(&subtask.description)
    .bind(&subtask.agent_type)
    .bind(subtask.agent_id.as_ref().map(|a| a.as_str()))
    .bind(&blocked_by)
    .bind(subtask.priority)
    .bind(subtask.status.as_str())
    .bind(&result)
    .bind(subtask.created_at)
    .bind(subtask.started_at)
    .bind(subtask.completed_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Raise a non-terminal wave's task count; `Conflict` for a terminal wave.
async fn add_wave_tasks(
    conn: &mut PgConnection,
    request: RequestId,
    wave_number: u32,
    count: u32,
) -> Result<Wave, RepositoryError> {
    let row = sqlx::query(&format!(
        "UPDATE waves SET total_tasks = total_tasks + $3 \
         WHERE request_id = $1 AND wave_number = $2 AND status NOT IN ('completed', 'failed') \
         RETURNING {WAVE_COLUMNS}"
    ))
    .bind(request.0)
    .bind(wave_number as i32)
    .bind(count as i32)
    .fetch_optional(conn)
    .await?;
    match row {
        Some(row) => wave_from_row(&row),
        None => Err(RepositoryError::Conflict(format!(
            "wave {wave_number} of request {request} is already terminal"
        ))),
    }
}

#[async_trait]
impl BatchRepository for PostgresStore {
    async fn submit(&self, mut batch: Batch, mut subtasks: Vec<Subtask>) -> Result<SubmittedBatch, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        ensure_session(&mut tx, &batch.session_id).await?;
        let request_exists = sqlx::query("SELECT 1 FROM requests WHERE id = $1")
            .bind(batch.request_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if request_exists.is_none() {
            return Err(RepositoryError::NotFound(format!("request {}", batch.request_id)));
        }

        upsert_wave(&mut tx, batch.request_id, &batch.session_id, batch.wave_number).await?;
        let wave = add_wave_tasks(&mut tx, batch.request_id, batch.wave_number, subtasks.len() as u32).await?;

        batch.wave_id = wave.id;
        batch.total_tasks = subtasks.len() as u32;
        sqlx::query(
            r#"
            INSERT INTO batches (id, session_id, request_id, wave_id, wave_number, name, status,
                                 total_tasks, completed_tasks, failed_tasks, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, 0, $9)
            "#,
        )
        .bind(batch.id.0)
        .bind(batch.session_id.as_str())
        .bind(batch.request_id.0)
        .bind(wave.id.0)
        .bind(wave.wave_number as i32)
        .bind(&batch.name)
        .bind(batch.status.as_str())
        .bind(batch.total_tasks as i32)
        .bind(batch.created_at)
        .execute(&mut *tx)
        .await?;

        for subtask in &mut subtasks {
            subtask.wave_id = wave.id;
            subtask.wave_number = wave.wave_number;
            subtask.batch_id = Some(batch.id);
            insert_subtask(&mut tx, subtask).await?;
        }

        tx.commit().await?;
        Ok(SubmittedBatch { batch, wave, subtasks })
    }

    async fn find(&self, id: BatchId) -> Result<Option<Batch>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(batch_from_row).transpose()
    }

    async fn increment_outcome(&self, id: BatchId, failed: bool) -> Result<Option<Batch>, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE batches SET
                completed_tasks = completed_tasks + CASE WHEN $2 THEN 0 ELSE 1 END,
                failed_tasks = failed_tasks + CASE WHEN $2 THEN 1 ELSE 0 END
            WHERE id = $1
              AND status = 'pending'
              AND completed_tasks + failed_tasks < total_tasks
            RETURNING {BATCH_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(failed)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(batch_from_row(&row)?)),
            None => match BatchRepository::find(self, id).await? {
                Some(_) => Ok(None),
                None => Err(RepositoryError::NotFound(format!("batch {id}"))),
            },
        }
    }

    async fn finalize(
        &self,
        id: BatchId,
        synthesis: &Synthesis,
        at: DateTime<Utc>,
    ) -> Result<Option<Batch>, RepositoryError> {
        let status = if synthesis.stats.failed > 0 { "failed" } else { "completed" };
        let value = serde_json::to_value(synthesis)?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE batches SET
                status = $2,
                completed_tasks = $3,
                failed_tasks = $4,
                synthesis = $5,
                completed_at = $6
            WHERE id = $1 AND status = 'pending'
            RETURNING {BATCH_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(status)
        .bind(synthesis.stats.completed as i32)
        .bind(synthesis.stats.failed as i32)
        .bind(&value)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(batch_from_row(&row)?)),
            None => match BatchRepository::find(self, id).await? {
                Some(_) => Ok(None),
                None => Err(RepositoryError::NotFound(format!("batch {id}"))),
            },
        }
    }
}

#[async_trait]
impl SubtaskRepository for PostgresStore {
    async fn create_in_wave(&self, subtask: &Subtask) -> Result<Wave, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let wave = add_wave_tasks(&mut tx, subtask.request_id, subtask.wave_number, 1).await?;
        if wave.id != subtask.wave_id {
            return Err(RepositoryError::Conflict(format!(
                "subtask wave {} does not match wave {}",
                subtask.wave_id, wave.id
            )));
        }
        insert_subtask(&mut tx, subtask).await?;
        tx.commit().await?;
        Ok(wave)
    }

    async fn find(&self, id: SubtaskId) -> Result<Option<Subtask>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(subtask_from_row).transpose()
    }

    async fn transition(
        &self,
        id: SubtaskId,
        to: SubtaskStatus,
        result: Option<SubtaskResult>,
        at: DateTime<Utc>,
    ) -> Result<TransitionRecord, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!("SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE id = $1 FOR UPDATE"))
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("subtask {id}")))?;
        let mut subtask = subtask_from_row(&row)?;

        let outcome = subtask
            .transition(to, result, at)
            .map_err(|e| RepositoryError::Conflict(e.to_string()))?;

        if let TransitionOutcome::Applied { .. } = outcome {
            let result = subtask.result.as_ref().map(serde_json::to_value).transpose()?;
            sqlx::query(
                r#"
                UPDATE subtasks SET status = $2, result = $3, started_at = $4, completed_at = $5
                WHERE id = $1
                "#,
            )
            .bind(id.0)
            .bind(subtask.status.as_str())
            .bind(&result)
            .bind(subtask.started_at)
            .bind(subtask.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(TransitionRecord { subtask, outcome })
    }

    async fn list_for_batch(&self, batch: BatchId) -> Result<Vec<Subtask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE batch_id = $1 \
             ORDER BY priority DESC, created_at ASC, seq ASC"
        ))
        .bind(batch.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subtask_from_row).collect()
    }

    async fn list_for_wave(&self, wave: WaveId) -> Result<Vec<Subtask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE wave_id = $1 ORDER BY created_at ASC, seq ASC"
        ))
        .bind(wave.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subtask_from_row).collect()
    }

    async fn list_active_for_session(&self, session: &SessionId) -> Result<Vec<Subtask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM subtasks \
             WHERE session_id = $1 AND status NOT IN ('completed', 'failed') \
             ORDER BY created_at ASC, seq ASC"
        ))
        .bind(session.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subtask_from_row).collect()
    }

    async fn close_session(&self, session: &SessionId, at: DateTime<Utc>) -> Result<Vec<Subtask>, RepositoryError> {
        let ended = serde_json::to_value(SubtaskResult::session_ended())?;
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(&format!(
            r#"
            UPDATE subtasks SET
                status = 'completed',
                result = $2,
                started_at = COALESCE(started_at, $3),
                completed_at = $3
            WHERE session_id = $1 AND status NOT IN ('completed', 'failed')
            RETURNING {SUBTASK_COLUMNS}
            "#
        ))
        .bind(session.as_str())
        .bind(&ended)
        .bind(at)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE sessions SET status = 'ended', ended_at = COALESCE(ended_at, $2) WHERE id = $1",
        )
        .bind(session.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        rows.iter().map(subtask_from_row).collect()
    }
}
