// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Identity & Context
//!
//! Agents are identified by opaque strings handed to us by the hook layer
//! (e.g. `backend-developer-2`). [`AgentContext`] is the denormalised
//! "what is this agent doing right now" row kept up to date by the
//! context-population cascade and read back when a restore brief is built.

use crate::domain::session::SessionId;
use crate::domain::subtask::SubtaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque agent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Last known working state of an agent within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub agent_type: Option<String>,
    pub current_subtask: Option<SubtaskId>,
    pub status: String,
    pub last_summary: Option<String>,
    #[serde(default)]
    pub files_touched: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl AgentContext {
    /// Merge newly touched files, keeping first-seen order and no duplicates.
    pub fn touch_files<'a>(&mut self, files: impl IntoIterator<Item = &'a String>) {
        for file in files {
            if !self.files_touched.iter().any(|f| f == file) {
                self.files_touched.push(file.clone());
            }
        }
    }
}
