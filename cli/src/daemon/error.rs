// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP error mapping: every failure leaves the daemon as
//! `{"error": <message>, "code": <CODE>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use conductor_core::domain::error::OrchestrationError;
use conductor_core::domain::repository::RepositoryError;
use conductor_swarm::SwarmError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ApiError::NotFound(what),
            RepositoryError::Conflict(what) => ApiError::Conflict(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::Validation(msg) => ApiError::Validation(msg),
            OrchestrationError::NotFound(what) => ApiError::NotFound(what),
            OrchestrationError::Conflict(what) => ApiError::Conflict(what),
            OrchestrationError::Coordination(msg) => ApiError::Internal(msg),
            OrchestrationError::Repository(err) => err.into(),
        }
    }
}

impl From<SwarmError> for ApiError {
    fn from(err: SwarmError) -> Self {
        match err {
            SwarmError::Validation(msg) => ApiError::Validation(msg),
            SwarmError::SelfBlock(_) => ApiError::Conflict(err.to_string()),
            SwarmError::NotFound(what) => ApiError::NotFound(what),
            SwarmError::Repository(err) => err.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "Request failed: {}", self);
        }
        let body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_maps_to_status_codes() {
        let cases = [
            (ApiError::from(OrchestrationError::Validation("x".into())), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (ApiError::from(SwarmError::SelfBlock("a1".into())), StatusCode::BAD_REQUEST, "CONFLICT"),
            (ApiError::from(OrchestrationError::NotFound("batch".into())), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                ApiError::from(OrchestrationError::Repository(RepositoryError::Database("down".into()))),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }
}
