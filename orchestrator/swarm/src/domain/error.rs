// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use conductor_core::domain::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Agent {0} cannot block itself")]
    SelfBlock(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type SwarmResult<T> = Result<T, SwarmError>;
