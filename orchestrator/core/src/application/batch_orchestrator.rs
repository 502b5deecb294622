// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Batch Orchestrator Application Service
//!
//! Submits a set of subtasks for one wave as a single atomic store write and
//! exposes batch reads. Completion is delegated to the
//! [`AggregationEngine`](super::aggregation::AggregationEngine).

use super::aggregation::AggregationEngine;
use super::wave_scheduler::WaveScheduler;
use crate::domain::agent::AgentId;
use crate::domain::batch::{Batch, BatchId, Synthesis};
use crate::domain::conflict::Conflict;
use crate::domain::error::{OrchestrationError, OrchestrationResult};
use crate::domain::events::OrchestrationEvent;
use crate::domain::repository::{BatchRepository, SubmittedBatch, SubtaskRepository};
use crate::domain::session::SessionId;
use crate::domain::subtask::{InitialStatus, Subtask, SubtaskId};
use crate::domain::wave::WaveId;
use crate::infrastructure::event_bus::EventBus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// One task of a batch submission.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchTaskSpec {
    pub description: String,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub priority: i32,
    /// Existing subtasks this task waits on.
    #[serde(default)]
    pub blocked_by: Vec<SubtaskId>,
    /// Indices of earlier-or-later tasks in the same submission.
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitBatch {
    pub session_id: SessionId,
    pub wave_number: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub tasks: Vec<BatchTaskSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    pub batch: Batch,
    pub subtasks: Vec<Subtask>,
}

pub struct BatchOrchestrator {
    batches: Arc<dyn BatchRepository>,
    subtasks: Arc<dyn SubtaskRepository>,
    scheduler: Arc<WaveScheduler>,
    aggregation: Arc<AggregationEngine>,
    event_bus: Arc<EventBus>,
}

impl BatchOrchestrator {
    pub fn new(
        batches: Arc<dyn BatchRepository>,
        subtasks: Arc<dyn SubtaskRepository>,
        scheduler: Arc<WaveScheduler>,
        aggregation: Arc<AggregationEngine>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            batches,
            subtasks,
            scheduler,
            aggregation,
            event_bus,
        }
    }

    /// Create the batch and one pending subtask per task in one store
    /// transaction, then publish `BatchCreated`.
    pub async fn submit_batch(&self, submission: SubmitBatch) -> OrchestrationResult<SubmittedBatch> {
        validate(&submission)?;
        let request = self.scheduler.current_request(&submission.session_id).await?;
        let name = submission
            .name
            .clone()
            .unwrap_or_else(|| format!("wave-{}", submission.wave_number));

        let ids: Vec<SubtaskId> = submission.tasks.iter().map(|_| SubtaskId::new()).collect();
        let subtasks: Vec<Subtask> = submission
            .tasks
            .iter()
            .zip(&ids)
            .map(|(task, id)| {
                let mut subtask = Subtask::new(
                    submission.session_id.clone(),
                    request.id,
                    WaveId::default(),
                    submission.wave_number,
                    task.description.trim(),
                    task.agent_type.clone(),
                    task.agent_id.clone(),
                    InitialStatus::Pending,
                );
                subtask.id = *id;
                subtask.priority = task.priority;
                subtask.blocked_by = task
                    .blocked_by
                    .iter()
                    .copied()
                    .chain(task.depends_on.iter().map(|&i| ids[i]))
                    .collect::<BTreeSet<_>>();
                subtask
            })
            .collect();

        let batch = Batch::new(
            submission.session_id.clone(),
            request.id,
            WaveId::default(),
            submission.wave_number,
            name,
            subtasks.len() as u32,
        );

        let submitted = self.batches.submit(batch, subtasks).await?;
        info!(
            batch_id = %submitted.batch.id,
            session_id = %submitted.batch.session_id,
            wave_number = submitted.wave.wave_number,
            tasks = submitted.subtasks.len(),
            "Batch submitted"
        );
        self.event_bus.publish_orchestration_event(OrchestrationEvent::BatchCreated {
            batch_id: submitted.batch.id,
            session_id: submitted.batch.session_id.clone(),
            wave_number: submitted.wave.wave_number,
            subtask_ids: submitted.subtasks.iter().map(|s| s.id).collect(),
            created_at: submitted.batch.created_at,
        });
        Ok(submitted)
    }

    /// The batch with its subtasks by priority desc, then creation time.
    pub async fn get_batch(&self, id: BatchId) -> OrchestrationResult<BatchView> {
        let batch = self
            .batches
            .find(id)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("batch {id}")))?;
        let subtasks = self.subtasks.list_for_batch(id).await?;
        Ok(BatchView { batch, subtasks })
    }

    pub async fn complete_batch(&self, id: BatchId) -> OrchestrationResult<Synthesis> {
        self.aggregation.complete_batch(id).await
    }

    /// Stored synthesis of a finished batch, else a live one.
    pub async fn synthesis(&self, id: BatchId) -> OrchestrationResult<Synthesis> {
        let view = self.get_batch(id).await?;
        match view.batch.synthesis {
            Some(stored) => Ok(stored),
            None => self.aggregation.aggregate_results(id).await,
        }
    }

    pub async fn conflicts(&self, id: BatchId) -> OrchestrationResult<Vec<Conflict>> {
        self.aggregation.detect_conflicts(id).await
    }
}

fn validate(submission: &SubmitBatch) -> OrchestrationResult<()> {
    if submission.session_id.as_str().trim().is_empty() {
        return Err(OrchestrationError::Validation("session_id must not be empty".into()));
    }
    if submission.tasks.is_empty() {
        return Err(OrchestrationError::Validation("tasks must not be empty".into()));
    }
    let count = submission.tasks.len();
    for (index, task) in submission.tasks.iter().enumerate() {
        if task.description.trim().is_empty() {
            return Err(OrchestrationError::Validation(format!(
                "tasks[{index}].description must not be empty"
            )));
        }
        if let Some(&bad) = task.depends_on.iter().find(|&&d| d >= count || d == index) {
            return Err(OrchestrationError::Validation(format!(
                "tasks[{index}].depends_on has invalid index {bad}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(description: &str) -> BatchTaskSpec {
        BatchTaskSpec {
            description: description.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_rejects_self_dependency() {
        let mut task = spec("a");
        task.depends_on = vec![0];
        let submission = SubmitBatch {
            session_id: SessionId::from("s"),
            wave_number: 1,
            name: None,
            tasks: vec![task],
        };
        assert!(matches!(validate(&submission), Err(OrchestrationError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_empty_batch() {
        let submission = SubmitBatch {
            session_id: SessionId::from("s"),
            wave_number: 1,
            name: None,
            tasks: vec![],
        };
        assert!(validate(&submission).is_err());
    }
}
