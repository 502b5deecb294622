// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use super::router;
use crate::daemon::state::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use conductor_core::application::CascadeWorker;
use conductor_core::domain::orchestrator_config::OrchestratorConfigManifest;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (Router, CascadeWorker) {
    let spec = OrchestratorConfigManifest::default().spec;
    let (state, worker) = AppState::in_memory(&spec);
    (router(state), worker)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (router, _worker) = app();
    let (status, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_unknown_topic_is_a_validation_error() {
    let (router, _worker) = app();
    let (status, body) = send(
        &router,
        "POST",
        "/messages",
        Some(json!({"from": "a1", "topic": "gossip", "payload": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_self_block_is_a_conflict() {
    let (router, _worker) = app();
    let (status, body) = send(
        &router,
        "POST",
        "/blocking",
        Some(json!({"blocker": "a1", "blocked": "a1", "reason": "waiting"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_reblocking_updates_reason() {
    let (router, _worker) = app();
    let (_, first) = send(
        &router,
        "POST",
        "/blocking",
        Some(json!({"blocker": "a1", "blocked": "a2", "reason": "schema"})),
    )
    .await;
    let (status, second) = send(
        &router,
        "POST",
        "/blocking",
        Some(json!({"blocker": "a1", "blocked": "a2", "reason": "schema v2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["reason"], "schema v2");

    let (_, check) = send(&router, "GET", "/blocking/check?blocker=a1&blocked=a2", None).await;
    assert_eq!(check["blocked"], true);

    let (_, status_body) = send(&router, "GET", "/blocking/a2", None).await;
    assert_eq!(status_body["blocked_by_count"], 1);
    assert_eq!(status_body["is_blocked"], true);

    let relation_id = second["id"].as_str().unwrap().to_string();
    let (status, _) = send(&router, "DELETE", &format!("/blocking/{relation_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, check) = send(&router, "GET", "/blocking/check?blocker=a1&blocked=a2", None).await;
    assert_eq!(check["blocked"], false);
}

#[tokio::test]
async fn test_capacity_is_created_by_tracking() {
    let (router, _worker) = app();
    let (status, body) = send(&router, "GET", "/capacity/a1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, body) = send(
        &router,
        "POST",
        "/tokens/track",
        Some(json!({
            "agent_id": "a1",
            "session_id": "s1",
            "tool_name": "Read",
            "input_size": 400,
            "output_size": 400
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = send(&router, "GET", "/capacity/a1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_usage"], 200);

    let (status, health) = send(&router, "GET", "/context/health/a1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["should_compact"], false);
}

#[tokio::test]
async fn test_broadcast_is_fetched_and_marked_read() {
    let (router, _worker) = app();
    let (status, _) = send(
        &router,
        "POST",
        "/messages",
        Some(json!({"from": "a1", "topic": "api.changed", "payload": {"endpoint": "/users"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&router, "GET", "/messages/a2?include_broadcasts=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["unread_count"], 0);

    let (_, body) = send(&router, "GET", "/messages/a2?include_broadcasts=false", None).await;
    assert!(body["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_subscriptions_round_trip() {
    let (router, _worker) = app();
    let (status, created) = send(
        &router,
        "POST",
        "/subscribe",
        Some(json!({"agent_id": "a1", "topic": "schema.changed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = send(&router, "GET", "/subscriptions/a1", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let id = created["id"].as_str().unwrap().to_string();
    let (status, _) = send(&router, "DELETE", &format!("/subscriptions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        "POST",
        "/unsubscribe",
        Some(json!({"agent_id": "a1", "topic": "schema.changed"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_batch_with_failure_settles_failed_over_http() {
    let (router, mut worker) = app();
    let (status, submitted) = send(
        &router,
        "POST",
        "/orchestration/batch-submit",
        Some(json!({
            "session_id": "s1",
            "wave_number": 1,
            "tasks": [
                {"description": "Add login", "agent_id": "a1"},
                {"description": "Add logout", "agent_id": "a2"},
                {"description": "Add session store", "agent_id": "a3"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let batch_id = submitted["batch"]["id"].as_str().unwrap().to_string();
    let ids: Vec<String> = submitted["subtasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 3);

    for id in &ids[..2] {
        let (status, update) = send(
            &router,
            "POST",
            &format!("/subtasks/{id}/complete"),
            Some(json!({"result": {"summary": "done"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(update["applied"], true);
    }
    let (status, _) = send(
        &router,
        "POST",
        &format!("/subtasks/{}/fail", ids[2]),
        Some(json!({"reason": "tests red"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    worker.run_pending().await;

    let (_, view) = send(&router, "GET", &format!("/orchestration/batch/{batch_id}"), None).await;
    assert_eq!(view["batch"]["status"], "failed");

    let (_, synthesis) = send(&router, "GET", &format!("/orchestration/synthesis/{batch_id}"), None).await;
    assert_eq!(synthesis["next_wave_ready"], false);

    let (_, current) = send(&router, "GET", "/waves/s1/current", None).await;
    assert_eq!(current["wave"]["status"], "failed");
}

#[tokio::test]
async fn test_malformed_batch_id_is_rejected() {
    let (router, _worker) = app();
    let (status, body) = send(&router, "GET", "/orchestration/batch/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_snapshot_save_and_read() {
    let (router, _worker) = app();
    let (status, _) = send(&router, "GET", "/compact/snapshot/s1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, saved) = send(
        &router,
        "POST",
        "/compact/save",
        Some(json!({
            "session_id": "s1",
            "context_summary": "auth refactor in progress",
            "key_decisions": ["use JWT"],
            "modified_files": ["src/auth.rs"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["trigger"], "manual");

    let (_, latest) = send(&router, "GET", "/compact/snapshot/s1", None).await;
    assert_eq!(latest["id"], saved["id"]);

    let (status, restored) = send(
        &router,
        "POST",
        "/compact/restore",
        Some(json!({"session_id": "s1", "agent_id": "a1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restored["source"], "snapshot");
    assert!(restored["brief"].as_str().unwrap().contains("use JWT"));
}

#[tokio::test]
async fn test_plan_endpoints() {
    let (router, _worker) = app();
    let (status, estimate) = send(
        &router,
        "POST",
        "/orchestration/estimate",
        Some(json!({"task_description": "full security audit", "file_count": 20})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(estimate["tier"], "expert");

    let (status, body) = send(
        &router,
        "POST",
        "/orchestration/decompose",
        Some(json!({"task_description": "add endpoint", "constraints": {"max_parallel": 0, "max_total_turns": 10}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
