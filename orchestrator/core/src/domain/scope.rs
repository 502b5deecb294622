// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registered work scopes per agent type, consulted when crafting prompts.

use crate::domain::lookup::DegradedLookupError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Mandatory scope constraints an agent type was registered with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentScope {
    #[serde(default)]
    pub target_files: Vec<String>,
    #[serde(default)]
    pub target_directories: Vec<String>,
    #[serde(default)]
    pub max_files: Option<usize>,
    #[serde(default)]
    pub forbidden_actions: Vec<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

#[async_trait]
pub trait AgentScopeRegistry: Send + Sync {
    /// `Ok(None)` means the agent type has no registered scope.
    async fn scope_for(&self, agent_type: &str) -> Result<Option<AgentScope>, DegradedLookupError>;
}
