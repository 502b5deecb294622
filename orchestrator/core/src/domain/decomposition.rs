// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Wave Plans
//!
//! Every plan has the same three-wave shape:
//!
//! ```text
//! wave 0: explore ──▶ wave 1: specialists (parallel) ──▶ wave 2: review
//! ```
//!
//! Wave 1 is picked by scoring the task description against an
//! [`ArchetypeRegistry`]. When the summed turn budget exceeds the caller's
//! limit every step is scaled down proportionally, with a per-step floor.

use crate::domain::complexity::{ComplexityEstimate, ComplexityPolicy, EffortLevel};
use serde::{Deserialize, Serialize};

pub const EXPLORATION_WAVE: u32 = 0;
pub const IMPLEMENTATION_WAVE: u32 = 1;
pub const REVIEW_WAVE: u32 = 2;

/// Minimum turn budget any step keeps after scaling.
pub const MIN_STEP_TURNS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentArchetype {
    pub agent_type: String,
    pub focus: String,
    pub keywords: Vec<String>,
}

impl AgentArchetype {
    fn new(agent_type: &str, focus: &str, keywords: &[&str]) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            focus: focus.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Number of this archetype's keywords found in an already lower-cased text.
    pub fn score(&self, lowered: &str) -> usize {
        self.keywords.iter().filter(|k| lowered.contains(k.as_str())).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchetypeRegistry {
    pub archetypes: Vec<AgentArchetype>,
    pub fallback: AgentArchetype,
    pub explorer: AgentArchetype,
    pub reviewer: AgentArchetype,
    pub exploration_turns: u32,
    pub review_turns: u32,
}

impl Default for ArchetypeRegistry {
    fn default() -> Self {
        Self {
            archetypes: vec![
                AgentArchetype::new(
                    "backend-developer",
                    "Implement the server-side changes",
                    &["api", "endpoint", "server", "backend", "handler", "service", "route"],
                ),
                AgentArchetype::new(
                    "frontend-developer",
                    "Implement the user-facing changes",
                    &["ui", "frontend", "component", "page", "css", "react", "view", "layout"],
                ),
                AgentArchetype::new(
                    "database-architect",
                    "Design and apply the data-model changes",
                    &["database", "schema", "migration", "sql", "table", "index", "query"],
                ),
                AgentArchetype::new(
                    "security-auditor",
                    "Review and harden the security-sensitive parts",
                    &["security", "auth", "permission", "vulnerab", "token", "encrypt", "secret"],
                ),
                AgentArchetype::new(
                    "test-engineer",
                    "Write and extend the automated tests",
                    &["test", "coverage", "spec", "regression", "e2e"],
                ),
                AgentArchetype::new(
                    "devops-engineer",
                    "Adjust build, deployment and infrastructure",
                    &["deploy", "docker", "ci", "pipeline", "kubernetes", "infra", "build"],
                ),
                AgentArchetype::new(
                    "documentation-writer",
                    "Update the documentation",
                    &["docs", "documentation", "readme", "guide", "changelog"],
                ),
                AgentArchetype::new(
                    "performance-engineer",
                    "Measure and improve performance",
                    &["performance", "latency", "optimiz", "cache", "profil", "throughput"],
                ),
            ],
            fallback: AgentArchetype::new("general-developer", "Implement the change", &[]),
            explorer: AgentArchetype::new(
                "explorer",
                "Explore the codebase and map the files and interfaces involved",
                &[],
            ),
            reviewer: AgentArchetype::new(
                "code-reviewer",
                "Review the combined changes for conflicts and regressions",
                &[],
            ),
            exploration_turns: 10,
            review_turns: 10,
        }
    }
}

impl ArchetypeRegistry {
    /// Top `max_parallel` archetypes by keyword score, ties broken by
    /// registry order. Falls back to the default archetype on no match.
    pub fn select(&self, description: &str, max_parallel: usize) -> Vec<&AgentArchetype> {
        let lowered = description.to_lowercase();
        let mut scored: Vec<(usize, usize, &AgentArchetype)> = self
            .archetypes
            .iter()
            .enumerate()
            .map(|(index, a)| (a.score(&lowered), index, a))
            .filter(|(score, _, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let picked: Vec<&AgentArchetype> = scored
            .into_iter()
            .take(max_parallel.max(1))
            .map(|(_, _, a)| a)
            .collect();
        if picked.is_empty() {
            vec![&self.fallback]
        } else {
            picked
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub wave: u32,
    pub agent_type: String,
    pub description: String,
    pub depends_on: Vec<String>,
    pub max_turns: u32,
    pub effort: EffortLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavePlan {
    pub task_description: String,
    pub complexity: ComplexityEstimate,
    pub steps: Vec<PlanStep>,
    pub total_turns: u32,
    pub max_total_turns: u32,
    /// Factor applied to every step's budget, present only when scaling ran.
    pub scale_factor: Option<f64>,
}

impl WavePlan {
    pub fn wave(&self, wave: u32) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(move |s| s.wave == wave)
    }

    pub fn wave_count(&self) -> usize {
        let mut waves: Vec<u32> = self.steps.iter().map(|s| s.wave).collect();
        waves.dedup();
        waves.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompositionConstraints {
    pub max_parallel: usize,
    pub max_total_turns: u32,
}

impl Default for DecompositionConstraints {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            max_total_turns: 100,
        }
    }
}

pub fn decompose(
    task_description: &str,
    constraints: DecompositionConstraints,
    registry: &ArchetypeRegistry,
    complexity: &ComplexityPolicy,
) -> WavePlan {
    let estimate = complexity.estimate(task_description, 0);

    let explore = PlanStep {
        id: "w0-explore".to_string(),
        wave: EXPLORATION_WAVE,
        agent_type: registry.explorer.agent_type.clone(),
        description: format!("{}: {}", registry.explorer.focus, task_description),
        depends_on: Vec::new(),
        max_turns: registry.exploration_turns,
        effort: EffortLevel::Medium,
    };

    let specialists: Vec<PlanStep> = registry
        .select(task_description, constraints.max_parallel)
        .into_iter()
        .map(|archetype| PlanStep {
            id: format!("w1-{}", archetype.agent_type),
            wave: IMPLEMENTATION_WAVE,
            agent_type: archetype.agent_type.clone(),
            description: format!("{}: {}", archetype.focus, task_description),
            depends_on: vec![explore.id.clone()],
            max_turns: estimate.max_turns,
            effort: estimate.effort,
        })
        .collect();

    let review = PlanStep {
        id: "w2-review".to_string(),
        wave: REVIEW_WAVE,
        agent_type: registry.reviewer.agent_type.clone(),
        description: format!("{}: {}", registry.reviewer.focus, task_description),
        depends_on: specialists.iter().map(|s| s.id.clone()).collect(),
        max_turns: registry.review_turns,
        effort: EffortLevel::Medium,
    };

    let mut steps = Vec::with_capacity(specialists.len() + 2);
    steps.push(explore);
    steps.extend(specialists);
    steps.push(review);

    let requested: u32 = steps.iter().map(|s| s.max_turns).sum();
    let mut scale_factor = None;
    if requested > constraints.max_total_turns {
        let factor = constraints.max_total_turns as f64 / requested as f64;
        for step in &mut steps {
            step.max_turns = ((step.max_turns as f64 * factor).floor() as u32).max(MIN_STEP_TURNS);
        }
        scale_factor = Some(factor);
    }

    WavePlan {
        task_description: task_description.to_string(),
        complexity: estimate,
        total_turns: steps.iter().map(|s| s.max_turns).sum(),
        max_total_turns: constraints.max_total_turns,
        steps,
        scale_factor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(description: &str, max_parallel: usize, max_total_turns: u32) -> WavePlan {
        decompose(
            description,
            DecompositionConstraints {
                max_parallel,
                max_total_turns,
            },
            &ArchetypeRegistry::default(),
            &ComplexityPolicy::default(),
        )
    }

    #[test]
    fn test_plan_has_three_waves_with_dependencies() {
        let plan = plan("Add an API endpoint backed by a new database table with tests", 2, 500);
        assert_eq!(plan.wave_count(), 3);
        assert_eq!(plan.wave(0).count(), 1);

        let specialists: Vec<&PlanStep> = plan.wave(1).collect();
        assert_eq!(specialists.len(), 2);
        assert!(specialists.iter().all(|s| s.depends_on == vec!["w0-explore".to_string()]));

        let review: Vec<&PlanStep> = plan.wave(2).collect();
        assert_eq!(review.len(), 1);
        assert_eq!(review[0].agent_type, "code-reviewer");
        assert_eq!(review[0].depends_on.len(), 2);
        assert!(plan.scale_factor.is_none());
    }

    #[test]
    fn test_unmatched_description_uses_fallback() {
        let plan = plan("make it nicer", 3, 500);
        let specialists: Vec<&PlanStep> = plan.wave(1).collect();
        assert_eq!(specialists.len(), 1);
        assert_eq!(specialists[0].agent_type, "general-developer");
    }

    #[test]
    fn test_budget_scaled_down_with_floor() {
        let plan = plan("redesign the backend api and the database schema", 3, 20);
        assert!(plan.scale_factor.is_some());
        assert!(plan.steps.iter().all(|s| s.max_turns >= MIN_STEP_TURNS));
        let unscaled = super::decompose(
            "redesign the backend api and the database schema",
            DecompositionConstraints {
                max_parallel: 3,
                max_total_turns: 10_000,
            },
            &ArchetypeRegistry::default(),
            &ComplexityPolicy::default(),
        );
        assert!(plan.total_turns < unscaled.total_turns);
    }
}
