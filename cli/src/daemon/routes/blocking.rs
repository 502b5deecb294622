// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use conductor_core::domain::agent::AgentId;
use conductor_swarm::{BlockingRelation, BlockingStatus};

use super::parse_id;
use crate::daemon::error::ApiResult;
use crate::daemon::extract::{ValidatedJson, ValidatedQuery};
use crate::daemon::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BlockBody {
    #[serde(alias = "blocked_by")]
    pub blocker: AgentId,
    #[serde(alias = "blocked_agent")]
    pub blocked: AgentId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PairBody {
    #[serde(alias = "blocked_by")]
    pub blocker: AgentId,
    #[serde(alias = "blocked_agent")]
    pub blocked: AgentId,
}

pub async fn block(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<BlockBody>,
) -> ApiResult<Json<BlockingRelation>> {
    let relation = state
        .swarm
        .blocking
        .block(&body.blocker, &body.blocked, &body.reason)
        .await?;
    Ok(Json(relation))
}

/// `GET /blocking/{agent_id}`: both directions with counts.
pub async fn status(State(state): State<AppState>, Path(agent_id): Path<String>) -> ApiResult<Json<BlockingStatus>> {
    let status = state.swarm.blocking.status(&AgentId::new(agent_id)).await?;
    Ok(Json(status))
}

pub async fn check(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<PairBody>,
) -> ApiResult<Json<Value>> {
    let relation = state.swarm.blocking.check(&query.blocker, &query.blocked).await?;
    Ok(Json(json!({
        "blocked": relation.is_some(),
        "relation": relation,
    })))
}

pub async fn unblock(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<PairBody>,
) -> ApiResult<Json<BlockingRelation>> {
    let relation = state.swarm.blocking.unblock(&body.blocker, &body.blocked).await?;
    Ok(Json(relation))
}

/// `DELETE /blocking/{relation_id}`
pub async fn delete_relation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BlockingRelation>> {
    let id = parse_id(&id, "relation id")?;
    let relation = state.swarm.blocking.unblock_by_id(id).await?;
    Ok(Json(relation))
}
