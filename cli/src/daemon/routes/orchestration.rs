// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use conductor_core::application::{BatchView, CraftedPrompt, PromptRequest, SubmitBatch};
use conductor_core::domain::batch::{BatchId, Synthesis};
use conductor_core::domain::complexity::ComplexityEstimate;
use conductor_core::domain::conflict::Conflict;
use conductor_core::domain::decomposition::{DecompositionConstraints, WavePlan};
use conductor_core::domain::repository::SubmittedBatch;

use super::parse_id;
use crate::daemon::error::ApiResult;
use crate::daemon::extract::ValidatedJson;
use crate::daemon::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DecomposeBody {
    pub task_description: String,
    #[serde(default)]
    pub constraints: DecompositionConstraints,
}

#[derive(Debug, Deserialize)]
pub struct EstimateBody {
    pub task_description: String,
    #[serde(default = "default_file_count")]
    pub file_count: usize,
}

fn default_file_count() -> usize {
    1
}

pub async fn craft_prompt(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<PromptRequest>,
) -> ApiResult<Json<CraftedPrompt>> {
    let crafted = state.conductor.prompts.craft_prompt(&body).await?;
    Ok(Json(crafted))
}

pub async fn decompose(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<DecomposeBody>,
) -> ApiResult<Json<WavePlan>> {
    let plan = state
        .conductor
        .decomposer
        .decompose(&body.task_description, body.constraints)?;
    Ok(Json(plan))
}

pub async fn estimate(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<EstimateBody>,
) -> ApiResult<Json<ComplexityEstimate>> {
    let estimate = state
        .conductor
        .decomposer
        .estimate(&body.task_description, body.file_count)?;
    Ok(Json(estimate))
}

pub async fn submit_batch(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<SubmitBatch>,
) -> ApiResult<Json<SubmittedBatch>> {
    let submitted = state.conductor.batches.submit_batch(body).await?;
    Ok(Json(submitted))
}

pub async fn get_batch(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<BatchView>> {
    let id = BatchId(parse_id(&id, "batch id")?);
    Ok(Json(state.conductor.batches.get_batch(id).await?))
}

pub async fn complete_batch(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Synthesis>> {
    let id = BatchId(parse_id(&id, "batch id")?);
    Ok(Json(state.conductor.batches.complete_batch(id).await?))
}

pub async fn synthesis(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Synthesis>> {
    let id = BatchId(parse_id(&id, "batch id")?);
    Ok(Json(state.conductor.batches.synthesis(id).await?))
}

pub async fn conflicts(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Vec<Conflict>>> {
    let id = BatchId(parse_id(&id, "batch id")?);
    Ok(Json(state.conductor.batches.conflicts(id).await?))
}
