// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Prompt Crafter Application Service
//!
//! Assembles a scoped, budgeted prompt for one agent:
//!
//! ```text
//! role header → task → scope (mandatory) → prior-wave context → effort → completion
//! ```
//!
//! The scope registry and the prior-wave lookup are secondary: when either
//! fails the prompt is still produced, without that section.

use crate::domain::complexity::{ComplexityPolicy, ComplexityTier, EffortLevel};
use crate::domain::error::{OrchestrationError, OrchestrationResult};
use crate::domain::lookup::{DegradeExt, DegradedLookupError, IntoDegraded};
use crate::domain::repository::{RequestRepository, SubtaskRepository, WaveRepository};
use crate::domain::scope::{AgentScope, AgentScopeRegistry};
use crate::domain::session::SessionId;
use crate::domain::subtask::{Subtask, SubtaskStatus};
use crate::domain::tokens::truncate_to_budget;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptRequest {
    pub task_description: String,
    pub agent_type: String,
    #[serde(default)]
    pub target_files: Vec<String>,
    #[serde(default)]
    pub target_directories: Vec<String>,
    #[serde(default)]
    pub wave_number: Option<u32>,
    #[serde(default)]
    pub budget_tokens: Option<usize>,
    /// Needed for prior-wave context; without it that section is skipped.
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CraftedPrompt {
    pub prompt: String,
    pub tier: ComplexityTier,
    pub effort: EffortLevel,
    pub max_turns: u32,
    pub prior_results: usize,
    pub truncated: bool,
}

pub struct PromptCrafter {
    scopes: Arc<dyn AgentScopeRegistry>,
    requests: Arc<dyn RequestRepository>,
    waves: Arc<dyn WaveRepository>,
    subtasks: Arc<dyn SubtaskRepository>,
    complexity: ComplexityPolicy,
}

impl PromptCrafter {
    pub fn new(
        scopes: Arc<dyn AgentScopeRegistry>,
        requests: Arc<dyn RequestRepository>,
        waves: Arc<dyn WaveRepository>,
        subtasks: Arc<dyn SubtaskRepository>,
        complexity: ComplexityPolicy,
    ) -> Self {
        Self {
            scopes,
            requests,
            waves,
            subtasks,
            complexity,
        }
    }

    pub async fn craft_prompt(&self, request: &PromptRequest) -> OrchestrationResult<CraftedPrompt> {
        if request.task_description.trim().is_empty() {
            return Err(OrchestrationError::Validation("task_description must not be empty".into()));
        }
        if request.agent_type.trim().is_empty() {
            return Err(OrchestrationError::Validation("agent_type must not be empty".into()));
        }

        let registered = self
            .scopes
            .scope_for(&request.agent_type)
            .await
            .or_degraded("craft_prompt");
        let scope = merge_scope(request, registered);

        let estimate = self
            .complexity
            .estimate(&request.task_description, scope.target_files.len());

        let prior = match (&request.session_id, request.wave_number) {
            (Some(session), Some(wave)) if wave > 0 => {
                self.prior_wave_results(session, wave - 1).await.or_degraded("craft_prompt")
            }
            _ => Vec::new(),
        };

        let mut prompt = String::new();
        let _ = writeln!(prompt, "# Role: {}\n", request.agent_type);
        if let Some(wave) = request.wave_number {
            let _ = writeln!(prompt, "You are working in wave {wave}.\n");
        }
        let _ = writeln!(prompt, "## Task\n{}\n", request.task_description.trim());
        prompt.push_str(&build_scope_section(&scope));
        if !prior.is_empty() {
            prompt.push('\n');
            prompt.push_str(&prior_wave_section(request.wave_number.unwrap_or(1) - 1, &prior));
        }
        let _ = writeln!(
            prompt,
            "\n## Effort\nComplexity: {} | Effort: {} | Turn budget: {}",
            estimate.tier.as_str(),
            estimate.effort.as_str(),
            estimate.max_turns
        );
        prompt.push_str(
            "\n## Completion\n\
             When finished, report your result with a short `summary` and the list of `files` you changed.\n\
             Stop and report instead of working outside the scope above.\n",
        );

        let mut truncated = false;
        if let Some(budget) = request.budget_tokens {
            let cut = truncate_to_budget(&prompt, budget);
            truncated = cut.len() != prompt.len();
            prompt = cut;
        }

        debug!(
            agent_type = %request.agent_type,
            tier = estimate.tier.as_str(),
            prior_results = prior.len(),
            truncated,
            "Prompt crafted"
        );

        Ok(CraftedPrompt {
            prompt,
            tier: estimate.tier,
            effort: estimate.effort,
            max_turns: estimate.max_turns,
            prior_results: prior.len(),
            truncated,
        })
    }

    /// Completed, agent-assigned subtasks of `wave_number` in the session's
    /// current request.
    async fn prior_wave_results(
        &self,
        session: &SessionId,
        wave_number: u32,
    ) -> Result<Vec<Subtask>, DegradedLookupError> {
        let Some(request) = self
            .requests
            .current_for_session(session)
            .await
            .degrade("prior wave results")?
        else {
            return Ok(Vec::new());
        };
        let Some(wave) = self
            .waves
            .find(request.id, wave_number)
            .await
            .degrade("prior wave results")?
        else {
            return Ok(Vec::new());
        };
        let subtasks = self
            .subtasks
            .list_for_wave(wave.id)
            .await
            .degrade("prior wave results")?;
        Ok(subtasks
            .into_iter()
            .filter(|s| s.status == SubtaskStatus::Completed && s.agent_type.is_some())
            .collect())
    }
}

fn merge_scope(request: &PromptRequest, registered: Option<AgentScope>) -> AgentScope {
    let mut scope = registered.unwrap_or_default();
    let mut files = request.target_files.clone();
    files.append(&mut scope.target_files);
    let mut directories = request.target_directories.clone();
    directories.append(&mut scope.target_directories);
    scope.target_files = dedup(files);
    scope.target_directories = dedup(directories);
    scope
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

/// Render the mandatory scope constraints. Unscoped work gets an explicit
/// warning block instead of an empty section.
pub fn build_scope_section(scope: &AgentScope) -> String {
    let mut out = String::from("## Scope (MANDATORY)\n");

    if scope.target_files.is_empty() && scope.target_directories.is_empty() {
        out.push_str(
            "> WARNING: no target files or directories were specified for this task.\n\
             > Do not modify anything until the orchestrator confirms the scope.\n",
        );
    } else {
        if !scope.target_files.is_empty() {
            out.push_str("Target files (only modify these):\n");
            for file in &scope.target_files {
                let _ = writeln!(out, "- {file}");
            }
        }
        if !scope.target_directories.is_empty() {
            out.push_str("Target directories (stay inside these):\n");
            for dir in &scope.target_directories {
                let _ = writeln!(out, "- {dir}");
            }
        }
    }

    if let Some(max) = scope.max_files {
        let _ = writeln!(out, "Maximum files to modify: {max}");
    }
    if !scope.forbidden_actions.is_empty() {
        out.push_str("Forbidden actions:\n");
        for action in &scope.forbidden_actions {
            let _ = writeln!(out, "- {action}");
        }
    }
    if !scope.allowed_tools.is_empty() {
        let _ = writeln!(out, "Allowed tools: {}", scope.allowed_tools.join(", "));
    }
    out
}

fn prior_wave_section(wave_number: u32, prior: &[Subtask]) -> String {
    let mut out = format!("## Context from wave {wave_number}\n");
    for subtask in prior {
        let summary = subtask
            .result
            .as_ref()
            .and_then(|r| r.summary.as_deref())
            .unwrap_or("(no summary)");
        let _ = write!(out, "- [{}] {}", subtask.agent_label(), summary);
        let files = subtask.referenced_files();
        if !files.is_empty() {
            let _ = write!(out, " (files: {})", files.join(", "));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::RequestRepository;
    use crate::domain::session::Request;
    use crate::domain::subtask::{InitialStatus, SubtaskResult};
    use crate::domain::tokens::TRUNCATION_MARKER;
    use crate::infrastructure::repositories::InMemoryStore;
    use crate::infrastructure::scope_registry::StaticScopeRegistry;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    struct OfflineRegistry;

    #[async_trait]
    impl AgentScopeRegistry for OfflineRegistry {
        async fn scope_for(&self, _agent_type: &str) -> Result<Option<AgentScope>, DegradedLookupError> {
            Err(DegradedLookupError::new("agent scope", "registry offline"))
        }
    }

    fn crafter(store: &InMemoryStore, scopes: Arc<dyn AgentScopeRegistry>) -> PromptCrafter {
        PromptCrafter::new(
            scopes,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            ComplexityPolicy::default(),
        )
    }

    fn request(description: &str) -> PromptRequest {
        PromptRequest {
            task_description: description.to_string(),
            agent_type: "backend-developer".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unscoped_section_warns() {
        let section = build_scope_section(&AgentScope::default());
        assert!(section.contains("WARNING"));
    }

    #[test]
    fn test_scope_section_is_deterministic() {
        let scope = AgentScope {
            target_files: vec!["src/a.rs".into(), "src/b.rs".into()],
            max_files: Some(2),
            forbidden_actions: vec!["git push".into()],
            allowed_tools: vec!["Read".into(), "Edit".into()],
            ..Default::default()
        };
        let section = build_scope_section(&scope);
        assert_eq!(section, build_scope_section(&scope));
        assert!(!section.contains("WARNING"));
        assert!(section.find("src/a.rs").unwrap() < section.find("src/b.rs").unwrap());
        assert!(section.contains("Maximum files to modify: 2"));
        assert!(section.contains("Allowed tools: Read, Edit"));
    }

    #[tokio::test]
    async fn test_registry_failure_degrades_to_unscoped() {
        let store = InMemoryStore::new();
        let crafted = crafter(&store, Arc::new(OfflineRegistry))
            .craft_prompt(&request("implement the login endpoint"))
            .await
            .unwrap();
        assert!(crafted.prompt.contains("WARNING"));
        assert_eq!(crafted.tier, ComplexityTier::Moderate);
    }

    #[tokio::test]
    async fn test_registered_scope_is_merged() {
        let store = InMemoryStore::new();
        let registry = StaticScopeRegistry::new();
        registry.register(
            "backend-developer",
            AgentScope {
                target_directories: vec!["services/api".into()],
                ..Default::default()
            },
        );
        let mut req = request("update handler");
        req.target_files = vec!["services/api/handler.rs".into()];
        let crafted = crafter(&store, Arc::new(registry)).craft_prompt(&req).await.unwrap();
        assert!(crafted.prompt.contains("services/api/handler.rs"));
        assert!(crafted.prompt.contains("- services/api\n"));
    }

    #[tokio::test]
    async fn test_prior_wave_context_and_budget() {
        let store = InMemoryStore::new();
        let session = SessionId::from("s1");
        let req = Request::new(session.clone(), None);
        RequestRepository::create(&store, &req).await.unwrap();
        let wave = WaveRepository::get_or_create(&store, req.id, &session, 0).await.unwrap();
        let done = Subtask::new(
            session.clone(),
            req.id,
            wave.id,
            0,
            "explore",
            Some("explorer".into()),
            None,
            InitialStatus::Running,
        );
        store.create_in_wave(&done).await.unwrap();
        store
            .transition(
                done.id,
                SubtaskStatus::Completed,
                Some(SubtaskResult::from(json!({"summary": "mapped the auth module", "files": ["src/auth.rs"]}))),
                Utc::now(),
            )
            .await
            .unwrap();

        let mut prompt_request = request("implement token refresh");
        prompt_request.session_id = Some(session);
        prompt_request.wave_number = Some(1);
        let crafter = crafter(&store, Arc::new(StaticScopeRegistry::new()));
        let crafted = crafter.craft_prompt(&prompt_request).await.unwrap();
        assert_eq!(crafted.prior_results, 1);
        assert!(crafted.prompt.contains("mapped the auth module"));

        prompt_request.budget_tokens = Some(20);
        let short = crafter.craft_prompt(&prompt_request).await.unwrap();
        assert!(short.truncated);
        assert!(short.prompt.ends_with(TRUNCATION_MARKER));
        assert_eq!(short.prompt.len(), 80 + TRUNCATION_MARKER.len());
    }
}
