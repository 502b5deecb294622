// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process agent scope registry.

use crate::domain::lookup::DegradedLookupError;
use crate::domain::scope::{AgentScope, AgentScopeRegistry};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Scopes registered at startup or through the API, keyed by agent type.
#[derive(Default)]
pub struct StaticScopeRegistry {
    scopes: RwLock<HashMap<String, AgentScope>>,
}

impl StaticScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent_type: impl Into<String>, scope: AgentScope) {
        self.scopes.write().insert(agent_type.into(), scope);
    }

    pub fn len(&self) -> usize {
        self.scopes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.read().is_empty()
    }
}

#[async_trait]
impl AgentScopeRegistry for StaticScopeRegistry {
    async fn scope_for(&self, agent_type: &str) -> Result<Option<AgentScope>, DegradedLookupError> {
        Ok(self.scopes.read().get(agent_type).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[test]
    fn test_unknown_agent_type_has_no_scope() {
        let registry = StaticScopeRegistry::new();
        registry.register(
            "frontend-developer",
            AgentScope {
                target_directories: vec!["web/".into()],
                ..Default::default()
            },
        );
        assert_eq!(registry.len(), 1);
        assert!(block_on(registry.scope_for("backend-developer")).unwrap().is_none());
        assert!(block_on(registry.scope_for("frontend-developer")).unwrap().is_some());
    }
}
