// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy of the orchestration services.
//!
//! Re-transitioning a terminal wave, batch or subtask is not an error: those
//! calls return a no-op outcome so retried cascades stay idempotent.

use crate::domain::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Malformed or missing input, rejected before any state change.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The coordination layer rejected a relay.
    #[error("Coordination failed: {0}")]
    Coordination(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for OrchestrationError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => OrchestrationError::NotFound(what),
            RepositoryError::Conflict(what) => OrchestrationError::Conflict(what),
            other => OrchestrationError::Repository(other),
        }
    }
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
