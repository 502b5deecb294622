// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use conductor_core::domain::session::SessionId;
use conductor_core::domain::wave::Wave;

use crate::daemon::error::ApiResult;
use crate::daemon::extract::ValidatedJson;
use crate::daemon::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WaveNumberBody {
    pub wave_number: u32,
}

pub async fn create_wave(
    State(state): State<AppState>,
    Path(session): Path<String>,
    ValidatedJson(body): ValidatedJson<WaveNumberBody>,
) -> ApiResult<Json<Wave>> {
    let wave = state
        .conductor
        .scheduler
        .get_or_create_wave(&SessionId::new(session), body.wave_number)
        .await?;
    Ok(Json(wave))
}

pub async fn start_wave(
    State(state): State<AppState>,
    Path(session): Path<String>,
    ValidatedJson(body): ValidatedJson<WaveNumberBody>,
) -> ApiResult<Json<Wave>> {
    let wave = state
        .conductor
        .scheduler
        .start_wave(&SessionId::new(session), body.wave_number)
        .await?;
    Ok(Json(wave))
}

pub async fn current_wave(State(state): State<AppState>, Path(session): Path<String>) -> ApiResult<Json<Value>> {
    let wave = state.conductor.scheduler.current_wave(&SessionId::new(session)).await?;
    Ok(Json(json!({ "wave": wave })))
}

pub async fn wave_history(State(state): State<AppState>, Path(session): Path<String>) -> ApiResult<Json<Vec<Wave>>> {
    let waves = state.conductor.scheduler.history(&SessionId::new(session)).await?;
    Ok(Json(waves))
}

/// `{"transitioned": false}` when the current wave is not terminal yet or no
/// later wave exists.
pub async fn transition_wave(State(state): State<AppState>, Path(session): Path<String>) -> ApiResult<Json<Value>> {
    let next = state
        .conductor
        .scheduler
        .transition_to_next_wave(&SessionId::new(session))
        .await?;
    Ok(Json(json!({
        "transitioned": next.is_some(),
        "wave": next,
    })))
}
