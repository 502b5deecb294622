// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Conflict Detection
//!
//! Heuristic collision detection across the subtasks of one batch. Three
//! independent passes run over the same input and their findings are
//! concatenated; no pass suppresses another.
//!
//! | Kind | Severity | Trigger |
//! |------|----------|---------|
//! | `FILE_CONFLICT` | warning | a file referenced by more than one distinct agent |
//! | `DEPENDENCY_CONFLICT` | error | a subtask blocked by a subtask that failed |
//! | `API_CONFLICT` | error | a failed subtask whose description mentions a contract keyword |
//!
//! The API pass is a keyword match on the description, not contract analysis.

use crate::domain::subtask::{Subtask, SubtaskId, SubtaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    #[serde(rename = "FILE_CONFLICT")]
    File,
    #[serde(rename = "DEPENDENCY_CONFLICT")]
    Dependency,
    #[serde(rename = "API_CONFLICT")]
    Api,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictKind::File => "FILE_CONFLICT",
            ConflictKind::Dependency => "DEPENDENCY_CONFLICT",
            ConflictKind::Api => "API_CONFLICT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub agents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub description: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtask_ids: Vec<SubtaskId>,
}

/// Keyword table for the API pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPolicy {
    pub api_keywords: Vec<String>,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            api_keywords: vec!["breaking".to_string(), "contract".to_string()],
        }
    }
}

pub fn detect_conflicts(subtasks: &[Subtask], policy: &ConflictPolicy) -> Vec<Conflict> {
    let mut conflicts = file_conflicts(subtasks);
    conflicts.extend(dependency_conflicts(subtasks));
    conflicts.extend(api_conflicts(subtasks, policy));
    conflicts
}

fn file_conflicts(subtasks: &[Subtask]) -> Vec<Conflict> {
    let mut by_file: BTreeMap<&str, (BTreeSet<String>, Vec<SubtaskId>)> = BTreeMap::new();
    for subtask in subtasks {
        let agent = subtask.agent_label();
        for file in subtask.referenced_files() {
            let entry = by_file.entry(file.as_str()).or_default();
            entry.0.insert(agent.clone());
            if !entry.1.contains(&subtask.id) {
                entry.1.push(subtask.id);
            }
        }
    }

    by_file
        .into_iter()
        .filter(|(_, (agents, _))| agents.len() > 1)
        .map(|(file, (agents, subtask_ids))| {
            let agents: Vec<String> = agents.into_iter().collect();
            Conflict {
                kind: ConflictKind::File,
                description: format!("File '{}' modified by multiple agents: {}", file, agents.join(", ")),
                agents,
                file: Some(file.to_string()),
                severity: Severity::Warning,
                subtask_ids,
            }
        })
        .collect()
}

fn dependency_conflicts(subtasks: &[Subtask]) -> Vec<Conflict> {
    let failed: HashMap<SubtaskId, &Subtask> = subtasks
        .iter()
        .filter(|s| s.status == SubtaskStatus::Failed)
        .map(|s| (s.id, s))
        .collect();

    let mut conflicts = Vec::new();
    for subtask in subtasks {
        for dependency in &subtask.blocked_by {
            if let Some(upstream) = failed.get(dependency) {
                conflicts.push(Conflict {
                    kind: ConflictKind::Dependency,
                    agents: vec![subtask.agent_label(), upstream.agent_label()],
                    file: None,
                    description: format!(
                        "Subtask {} depends on failed subtask {} ({})",
                        subtask.id, upstream.id, upstream.description
                    ),
                    severity: Severity::Error,
                    subtask_ids: vec![subtask.id, upstream.id],
                });
            }
        }
    }
    conflicts
}

fn api_conflicts(subtasks: &[Subtask], policy: &ConflictPolicy) -> Vec<Conflict> {
    subtasks
        .iter()
        .filter(|s| s.status == SubtaskStatus::Failed)
        .filter_map(|s| {
            let description = s.description.to_lowercase();
            let keyword = policy
                .api_keywords
                .iter()
                .find(|k| description.contains(k.as_str()))?;
            Some(Conflict {
                kind: ConflictKind::Api,
                agents: vec![s.agent_label()],
                file: None,
                description: format!(
                    "Failed subtask touching an API contract ('{}'): {}",
                    keyword, s.description
                ),
                severity: Severity::Error,
                subtask_ids: vec![s.id],
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;
    use crate::domain::session::{RequestId, SessionId};
    use crate::domain::subtask::{InitialStatus, SubtaskResult};
    use crate::domain::wave::WaveId;
    use chrono::Utc;
    use serde_json::json;

    fn task(agent: &str, description: &str, status: SubtaskStatus, files: &[&str]) -> Subtask {
        let mut t = Subtask::new(
            SessionId::from("s"),
            RequestId::new(),
            WaveId::new(),
            1,
            description,
            None,
            Some(AgentId::from(agent)),
            InitialStatus::Running,
        );
        t.transition(status, Some(SubtaskResult::from(json!({ "files": files }))), Utc::now())
            .unwrap();
        t
    }

    #[test]
    fn test_shared_file_yields_single_conflict_naming_both_agents() {
        let tasks = vec![
            task("a1", "one", SubtaskStatus::Completed, &["src/x.ts"]),
            task("a2", "two", SubtaskStatus::Completed, &["src/x.ts", "src/y.ts"]),
        ];
        let conflicts = detect_conflicts(&tasks, &ConflictPolicy::default());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::File);
        assert_eq!(conflicts[0].agents, vec!["a1", "a2"]);
        assert_eq!(conflicts[0].file.as_deref(), Some("src/x.ts"));
        assert_eq!(conflicts[0].severity, Severity::Warning);
    }

    #[test]
    fn test_same_agent_twice_is_not_a_file_conflict() {
        let tasks = vec![
            task("a1", "one", SubtaskStatus::Completed, &["src/x.ts"]),
            task("a1", "two", SubtaskStatus::Completed, &["src/x.ts"]),
        ];
        assert!(detect_conflicts(&tasks, &ConflictPolicy::default()).is_empty());
    }

    #[test]
    fn test_passes_are_additive() {
        let upstream = task("a1", "Introduce breaking change to auth API", SubtaskStatus::Failed, &["api.rs"]);
        let mut downstream = task("a2", "consume auth", SubtaskStatus::Completed, &["api.rs"]);
        downstream.blocked_by.insert(upstream.id);

        let conflicts = detect_conflicts(&[upstream, downstream], &ConflictPolicy::default());
        let kinds: Vec<ConflictKind> = conflicts.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ConflictKind::File, ConflictKind::Dependency, ConflictKind::Api]);
    }

    #[test]
    fn test_conflict_serializes_with_type_tag() {
        let tasks = vec![task("a", "contract update", SubtaskStatus::Failed, &[])];
        let conflicts = detect_conflicts(&tasks, &ConflictPolicy::default());
        let value = serde_json::to_value(&conflicts[0]).unwrap();
        assert_eq!(value["type"], "API_CONFLICT");
        assert_eq!(value["severity"], "error");
    }
}
