// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use conductor_core::domain::agent::AgentId;
use conductor_core::domain::capacity::{AgentCapacity, ContextHealth, TokenLedgerEntry, TokenUsage};

use crate::daemon::error::ApiResult;
use crate::daemon::extract::{ValidatedJson, ValidatedQuery};
use crate::daemon::state::AppState;

const DEFAULT_LEDGER_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Bookkeeping only; the caller gets no body back.
pub async fn track_tokens(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<TokenUsage>,
) -> ApiResult<StatusCode> {
    state.conductor.capacity.track_tokens(body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_capacity(State(state): State<AppState>, Path(agent_id): Path<String>) -> ApiResult<Json<AgentCapacity>> {
    let capacity = state.conductor.capacity.get_capacity(&AgentId::new(agent_id)).await?;
    Ok(Json(capacity))
}

pub async fn context_health(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<ContextHealth>> {
    let health = state.conductor.capacity.get_context_health(&AgentId::new(agent_id)).await?;
    Ok(Json(health))
}

pub async fn reset_capacity(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentCapacity>> {
    let capacity = state.conductor.capacity.reset_capacity(&AgentId::new(agent_id)).await?;
    Ok(Json(capacity))
}

pub async fn ledger(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    ValidatedQuery(query): ValidatedQuery<LedgerQuery>,
) -> ApiResult<Json<Vec<TokenLedgerEntry>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LEDGER_LIMIT);
    let entries = state.conductor.capacity.ledger(&AgentId::new(agent_id), limit).await?;
    Ok(Json(entries))
}
