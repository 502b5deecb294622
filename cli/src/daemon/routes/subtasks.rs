// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent-facing subtask lifecycle. Terminal transitions return as soon as
//! the new status is stored; counters, broadcast and context population run
//! on the cascade worker afterwards.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use conductor_core::application::subtask_service::{CreatedSubtask, SubtaskUpdate};
use conductor_core::application::CreateSubtask;
use conductor_core::domain::session::SessionId;
use conductor_core::domain::subtask::{Subtask, SubtaskId, SubtaskResult};

use super::parse_id;
use crate::daemon::error::{ApiError, ApiResult};
use crate::daemon::extract::ValidatedJson;
use crate::daemon::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    #[serde(default)]
    pub result: SubtaskResult,
}

#[derive(Debug, Deserialize)]
pub struct FailBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CloseSessionBody {
    pub session_id: SessionId,
}

fn subtask_id(raw: &str) -> ApiResult<SubtaskId> {
    parse_id(raw, "subtask id").map(SubtaskId)
}

pub async fn create(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<CreateSubtask>,
) -> ApiResult<Json<CreatedSubtask>> {
    Ok(Json(state.conductor.subtasks.create(body).await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Subtask>> {
    Ok(Json(state.conductor.subtasks.get(subtask_id(&id)?).await?))
}

pub async fn list_for_wave(
    State(state): State<AppState>,
    Path((session, wave_number)): Path<(String, String)>,
) -> ApiResult<Json<Vec<Subtask>>> {
    let wave_number: u32 = wave_number
        .parse()
        .map_err(|_| ApiError::Validation(format!("wave_number must be a non-negative integer, got '{wave_number}'")))?;
    let subtasks = state
        .conductor
        .subtasks
        .list_for_wave(&SessionId::new(session), wave_number)
        .await?;
    Ok(Json(subtasks))
}

pub async fn start(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<SubtaskUpdate>> {
    Ok(Json(state.conductor.subtasks.start(subtask_id(&id)?).await?))
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<SubtaskUpdate>> {
    Ok(Json(state.conductor.subtasks.pause(subtask_id(&id)?).await?))
}

pub async fn mark_blocked(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<SubtaskUpdate>> {
    Ok(Json(state.conductor.subtasks.mark_blocked(subtask_id(&id)?).await?))
}

pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<CompleteBody>,
) -> ApiResult<Json<SubtaskUpdate>> {
    let id = subtask_id(&id)?;
    Ok(Json(state.conductor.subtasks.complete(id, body.result).await?))
}

pub async fn fail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<FailBody>,
) -> ApiResult<Json<SubtaskUpdate>> {
    let id = subtask_id(&id)?;
    Ok(Json(state.conductor.subtasks.fail(id, body.reason).await?))
}

/// Orphan sweep: force-completes every open subtask of the session.
pub async fn close_session(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<CloseSessionBody>,
) -> ApiResult<Json<Value>> {
    let closed = state.conductor.subtasks.close_session(&body.session_id).await?;
    Ok(Json(json!({
        "session_id": body.session_id,
        "closed": closed.len(),
        "subtasks": closed,
    })))
}
