// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP routes of the daemon. One module per area; every handler is a thin
//! adapter from JSON to an application service call.

mod blocking;
mod capacity;
mod compact;
mod events;
mod messaging;
mod orchestration;
mod subtasks;
mod waves;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(events::stream_events))
        // Waves
        .route("/waves/{session}/create", post(waves::create_wave))
        .route("/waves/{session}/current", get(waves::current_wave))
        .route("/waves/{session}/history", get(waves::wave_history))
        .route("/waves/{session}/transition", post(waves::transition_wave))
        .route("/waves/{session}/start", post(waves::start_wave))
        .route("/waves/{session}/{wave_number}/subtasks", get(subtasks::list_for_wave))
        // Planning and batches
        .route("/orchestration/craft-prompt", post(orchestration::craft_prompt))
        .route("/orchestration/decompose", post(orchestration::decompose))
        .route("/orchestration/estimate", post(orchestration::estimate))
        .route("/orchestration/batch-submit", post(orchestration::submit_batch))
        .route("/orchestration/batch/{id}", get(orchestration::get_batch))
        .route("/orchestration/batch/{id}/complete", post(orchestration::complete_batch))
        .route("/orchestration/synthesis/{id}", get(orchestration::synthesis))
        .route("/orchestration/conflicts/{id}", get(orchestration::conflicts))
        // Capacity
        .route("/tokens/track", post(capacity::track_tokens))
        .route("/capacity/{agent_id}", get(capacity::get_capacity))
        .route("/capacity/{agent_id}/reset", post(capacity::reset_capacity))
        .route("/capacity/{agent_id}/ledger", get(capacity::ledger))
        .route("/context/health/{agent_id}", get(capacity::context_health))
        // Messaging
        .route("/messages", post(messaging::publish))
        .route("/messages/{agent_id}", get(messaging::fetch))
        .route("/subscribe", post(messaging::subscribe))
        .route("/unsubscribe", post(messaging::unsubscribe))
        .route(
            "/subscriptions/{id}",
            get(messaging::list_subscriptions).delete(messaging::delete_subscription),
        )
        // Blocking
        .route("/blocking", post(blocking::block))
        .route("/blocking/check", get(blocking::check))
        .route("/blocking/{id}", get(blocking::status).delete(blocking::delete_relation))
        .route("/unblock", post(blocking::unblock))
        // Compaction
        .route("/compact/save", post(compact::save))
        .route("/compact/restore", post(compact::restore))
        .route("/compact/status/{session_id}", get(compact::status))
        .route("/compact/snapshot/{session_id}", get(compact::snapshot))
        // Subtask lifecycle
        .route("/subtasks", post(subtasks::create))
        .route("/subtasks/close-session", post(subtasks::close_session))
        .route("/subtasks/{id}", get(subtasks::get))
        .route("/subtasks/{id}/start", post(subtasks::start))
        .route("/subtasks/{id}/pause", post(subtasks::pause))
        .route("/subtasks/{id}/block", post(subtasks::mark_blocked))
        .route("/subtasks/{id}/complete", post(subtasks::complete))
        .route("/subtasks/{id}/fail", post(subtasks::fail))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

/// Path segments that must be UUIDs (batch, subtask, relation and
/// subscription ids).
pub(crate) fn parse_id(raw: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation(format!("{what} must be a UUID, got '{raw}'")))
}

#[cfg(test)]
mod tests;
