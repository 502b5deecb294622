// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use conductor_core::application::{RestoreBrief, RestoreRequest};
use conductor_core::domain::session::SessionId;
use conductor_core::domain::snapshot::{CompactionStatus, Snapshot, SnapshotContent, SnapshotTrigger};

use crate::daemon::error::{ApiError, ApiResult};
use crate::daemon::extract::ValidatedJson;
use crate::daemon::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SaveBody {
    pub session_id: SessionId,
    #[serde(default)]
    pub trigger: Option<SnapshotTrigger>,
    #[serde(flatten)]
    pub content: SnapshotContent,
}

pub async fn save(State(state): State<AppState>, ValidatedJson(body): ValidatedJson<SaveBody>) -> ApiResult<Json<Snapshot>> {
    let trigger = body.trigger.unwrap_or(SnapshotTrigger::Manual);
    let snapshot = state
        .conductor
        .snapshots
        .save(&body.session_id, trigger, body.content)
        .await?;
    Ok(Json(snapshot))
}

pub async fn restore(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<RestoreRequest>,
) -> ApiResult<Json<RestoreBrief>> {
    Ok(Json(state.conductor.snapshots.restore(body).await?))
}

pub async fn status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<CompactionStatus>> {
    let status = state.conductor.snapshots.status(&SessionId::new(session_id)).await?;
    Ok(Json(status))
}

/// The authoritative (latest) snapshot of a session.
pub async fn snapshot(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<Json<Snapshot>> {
    let session = SessionId::new(session_id);
    state
        .conductor
        .snapshots
        .latest_snapshot(&session)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no snapshot for session {session}")))
}
