// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL store: sessions, requests and waves.
//!
//! Batch/subtask and capacity/snapshot ports are implemented for the same
//! [`PostgresStore`] in `postgres_batch.rs` and `postgres_capacity.rs`.
//! Counters only ever change through conditional `UPDATE ... RETURNING`.

use crate::domain::repository::{RepositoryError, RequestRepository, SessionRepository, WaveRepository};
use crate::domain::session::{Request, RequestId, RequestMetadata, Session, SessionId, SessionStatus};
use crate::domain::wave::{Wave, WaveId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Row};
use std::str::FromStr;

#[derive(Clone)]
pub struct PostgresStore {
    pub(super) pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(super) fn parse_enum<T: FromStr<Err = String>>(value: &str) -> Result<T, RepositoryError> {
    value.parse().map_err(RepositoryError::Serialization)
}

pub(super) const WAVE_COLUMNS: &str = "id, request_id, session_id, wave_number, status, total_tasks, \
     completed_tasks, failed_tasks, created_at, started_at, completed_at";

pub(super) fn wave_from_row(row: &PgRow) -> Result<Wave, RepositoryError> {
    Ok(Wave {
        id: WaveId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        session_id: SessionId(row.try_get("session_id")?),
        wave_number: row.try_get::<i32, _>("wave_number")? as u32,
        status: parse_enum(row.try_get::<&str, _>("status")?)?,
        total_tasks: row.try_get::<i32, _>("total_tasks")? as u32,
        completed_tasks: row.try_get::<i32, _>("completed_tasks")? as u32,
        failed_tasks: row.try_get::<i32, _>("failed_tasks")? as u32,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

pub(super) fn session_from_row(row: &PgRow) -> Result<Session, RepositoryError> {
    let status = match row.try_get::<&str, _>("status")? {
        "ended" => SessionStatus::Ended,
        _ => SessionStatus::Active,
    };
    Ok(Session {
        id: SessionId(row.try_get("id")?),
        status,
        compacted_at: row.try_get("compacted_at")?,
        compact_count: row.try_get::<i32, _>("compact_count")? as u32,
        created_at: row.try_get("created_at")?,
        ended_at: row.try_get("ended_at")?,
    })
}

fn request_from_row(row: &PgRow) -> Result<Request, RepositoryError> {
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let metadata: RequestMetadata = serde_json::from_value(metadata)?;
    Ok(Request {
        id: RequestId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        prompt: row.try_get("prompt")?,
        status: parse_enum(row.try_get::<&str, _>("status")?)?,
        metadata,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Insert the session row if it does not exist yet.
pub(super) async fn ensure_session(conn: &mut PgConnection, id: &SessionId) -> Result<(), RepositoryError> {
    sqlx::query("INSERT INTO sessions (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
        .bind(id.as_str())
        .execute(conn)
        .await?;
    Ok(())
}

/// Find-or-insert the wave for `(request, wave_number)`.
pub(super) async fn upsert_wave(
    conn: &mut PgConnection,
    request: RequestId,
    session: &SessionId,
    wave_number: u32,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO waves (id, request_id, session_id, wave_number, status, created_at)
        VALUES ($1, $2, $3, $4, 'pending', NOW())
        ON CONFLICT (request_id, wave_number) DO NOTHING
        "#,
    )
    .bind(WaveId::new().0)
    .bind(request.0)
    .bind(session.as_str())
    .bind(wave_number as i32)
    .execute(conn)
    .await?;
    Ok(())
}

impl PostgresStore {
    async fn wave_exists(&self, id: WaveId) -> Result<(), RepositoryError> {
        let found = sqlx::query("SELECT 1 FROM waves WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound(format!("wave {id}"))),
        }
    }
}

#[async_trait]
impl SessionRepository for PostgresStore {
    async fn get_or_create(&self, id: &SessionId) -> Result<Session, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        ensure_session(&mut conn, id).await?;
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .fetch_one(&mut *conn)
            .await?;
        session_from_row(&row)
    }

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }
}

#[async_trait]
impl RequestRepository for PostgresStore {
    async fn create(&self, request: &Request) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_value(&request.metadata)?;
        let mut tx = self.pool.begin().await?;
        ensure_session(&mut tx, &request.session_id).await?;
        sqlx::query(
            r#"
            INSERT INTO requests (id, session_id, prompt, status, metadata, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(request.id.0)
        .bind(request.session_id.as_str())
        .bind(&request.prompt)
        .bind(request.status.as_str())
        .bind(&metadata)
        .bind(request.created_at)
        .bind(request.completed_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, id: RequestId) -> Result<Option<Request>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM requests WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn current_for_session(&self, session: &SessionId) -> Result<Option<Request>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM requests WHERE session_id = $1 ORDER BY created_at DESC LIMIT 1")
            .bind(session.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn finish_if_settled(&self, id: RequestId, at: DateTime<Utc>) -> Result<Option<Request>, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE requests SET
                status = CASE
                    WHEN EXISTS (SELECT 1 FROM waves WHERE request_id = $1 AND status = 'failed') THEN 'failed'
                    ELSE 'completed'
                END,
                completed_at = $2
            WHERE id = $1
              AND status = 'active'
              AND EXISTS (SELECT 1 FROM waves WHERE request_id = $1)
              AND NOT EXISTS (
                  SELECT 1 FROM waves WHERE request_id = $1 AND status NOT IN ('completed', 'failed')
              )
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(request_from_row).transpose()
    }
}

#[async_trait]
impl WaveRepository for PostgresStore {
    async fn get_or_create(
        &self,
        request: RequestId,
        session: &SessionId,
        wave_number: u32,
    ) -> Result<Wave, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        upsert_wave(&mut conn, request, session, wave_number).await?;
        let row = sqlx::query(&format!(
            "SELECT {WAVE_COLUMNS} FROM waves WHERE request_id = $1 AND wave_number = $2"
        ))
        .bind(request.0)
        .bind(wave_number as i32)
        .fetch_one(&mut *conn)
        .await?;
        wave_from_row(&row)
    }

    async fn find(&self, request: RequestId, wave_number: u32) -> Result<Option<Wave>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {WAVE_COLUMNS} FROM waves WHERE request_id = $1 AND wave_number = $2"
        ))
        .bind(request.0)
        .bind(wave_number as i32)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(wave_from_row).transpose()
    }

    async fn find_by_id(&self, id: WaveId) -> Result<Option<Wave>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {WAVE_COLUMNS} FROM waves WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(wave_from_row).transpose()
    }

    async fn list_for_request(&self, request: RequestId) -> Result<Vec<Wave>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {WAVE_COLUMNS} FROM waves WHERE request_id = $1 ORDER BY wave_number ASC"
        ))
        .bind(request.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(wave_from_row).collect()
    }

    async fn mark_running(&self, id: WaveId, at: DateTime<Utc>) -> Result<Option<Wave>, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE waves SET status = 'running', started_at = $2 \
             WHERE id = $1 AND status = 'pending' RETURNING {WAVE_COLUMNS}"
        ))
        .bind(id.0)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(wave_from_row(&row)?)),
            None => self.wave_exists(id).await.map(|_| None),
        }
    }

    async fn increment_outcome(&self, id: WaveId, failed: bool) -> Result<Option<Wave>, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE waves SET
                completed_tasks = completed_tasks + CASE WHEN $2 THEN 0 ELSE 1 END,
                failed_tasks = failed_tasks + CASE WHEN $2 THEN 1 ELSE 0 END
            WHERE id = $1
              AND status NOT IN ('completed', 'failed')
              AND completed_tasks + failed_tasks < total_tasks
            RETURNING {WAVE_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(failed)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(wave_from_row(&row)?)),
            None => self.wave_exists(id).await.map(|_| None),
        }
    }

    async fn finalize_if_settled(&self, id: WaveId, at: DateTime<Utc>) -> Result<Option<Wave>, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE waves SET
                status = CASE WHEN failed_tasks > 0 THEN 'failed' ELSE 'completed' END,
                started_at = COALESCE(started_at, $2),
                completed_at = $2
            WHERE id = $1
              AND status NOT IN ('completed', 'failed')
              AND total_tasks > 0
              AND completed_tasks + failed_tasks = total_tasks
            RETURNING {WAVE_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(wave_from_row(&row)?)),
            None => self.wave_exists(id).await.map(|_| None),
        }
    }
}
