// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use conductor_core::domain::agent::AgentId;
use conductor_swarm::application::{FetchOptions, PublishMessage};
use conductor_swarm::{FetchResult, Message, MessageTopic, Subscription};

use super::parse_id;
use crate::daemon::error::ApiResult;
use crate::daemon::extract::{ValidatedJson, ValidatedQuery};
use crate::daemon::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TopicBody {
    pub agent_id: AgentId,
    pub topic: MessageTopic,
}

pub async fn publish(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<PublishMessage>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let message = state.swarm.messaging.publish(body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Marks every returned message as read by `agent_id`.
pub async fn fetch(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    ValidatedQuery(options): ValidatedQuery<FetchOptions>,
) -> ApiResult<Json<FetchResult>> {
    let result = state.swarm.messaging.fetch(&AgentId::new(agent_id), options).await?;
    Ok(Json(result))
}

pub async fn subscribe(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<TopicBody>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state.swarm.messaging.subscribe(body.agent_id, body.topic).await?;
    Ok(Json(subscription))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<TopicBody>,
) -> ApiResult<Json<Subscription>> {
    let removed = state.swarm.messaging.unsubscribe(&body.agent_id, body.topic).await?;
    Ok(Json(removed))
}

/// `GET /subscriptions/{agent_id}`
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Vec<Subscription>>> {
    let subscriptions = state.swarm.messaging.subscriptions(&AgentId::new(agent_id)).await?;
    Ok(Json(subscriptions))
}

/// `DELETE /subscriptions/{subscription_id}`
pub async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Subscription>> {
    let id = parse_id(&id, "subscription id")?;
    let removed = state.swarm.messaging.unsubscribe_by_id(id).await?;
    Ok(Json(removed))
}
