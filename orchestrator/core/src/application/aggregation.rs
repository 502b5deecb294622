// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Aggregation & Conflict Engine
//!
//! Builds batch syntheses, runs the conflict heuristics and settles batches
//! and requests once their children are terminal. Every settle step is
//! guarded by a conditional store update, so redundant or concurrent calls
//! are no-ops.

use crate::domain::batch::{Batch, BatchId, Synthesis};
use crate::domain::conflict::{detect_conflicts, Conflict, ConflictPolicy};
use crate::domain::error::{OrchestrationError, OrchestrationResult};
use crate::domain::events::OrchestrationEvent;
use crate::domain::repository::{BatchRepository, RepositoryError, RequestRepository, SubtaskRepository};
use crate::domain::session::{Request, RequestId};
use crate::domain::subtask::Subtask;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

pub struct AggregationEngine {
    batches: Arc<dyn BatchRepository>,
    subtasks: Arc<dyn SubtaskRepository>,
    requests: Arc<dyn RequestRepository>,
    event_bus: Arc<EventBus>,
    policy: ConflictPolicy,
}

impl AggregationEngine {
    pub fn new(
        batches: Arc<dyn BatchRepository>,
        subtasks: Arc<dyn SubtaskRepository>,
        requests: Arc<dyn RequestRepository>,
        event_bus: Arc<EventBus>,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            batches,
            subtasks,
            requests,
            event_bus,
            policy,
        }
    }

    async fn load(&self, id: BatchId) -> OrchestrationResult<(Batch, Vec<Subtask>)> {
        let batch = self
            .batches
            .find(id)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("batch {id}")))?;
        let subtasks = self.subtasks.list_for_batch(id).await?;
        Ok((batch, subtasks))
    }

    fn synthesize(&self, batch: &Batch, subtasks: &[Subtask]) -> OrchestrationResult<Synthesis> {
        let conflicts = detect_conflicts(subtasks, &self.policy);
        Synthesis::build(&batch.name, batch.total_tasks, subtasks, conflicts)
            .map_err(|e| OrchestrationError::from(RepositoryError::from(e)))
    }

    /// Synthesis over the batch's current subtasks. Read-only.
    pub async fn aggregate_results(&self, id: BatchId) -> OrchestrationResult<Synthesis> {
        let (batch, subtasks) = self.load(id).await?;
        self.synthesize(&batch, &subtasks)
    }

    pub async fn detect_conflicts(&self, id: BatchId) -> OrchestrationResult<Vec<Conflict>> {
        let (_, subtasks) = self.load(id).await?;
        Ok(detect_conflicts(&subtasks, &self.policy))
    }

    /// True once every subtask of the batch is terminal. The call that
    /// observes the transition first finalizes the batch and checks the
    /// parent request.
    pub async fn check_batch_completion(&self, id: BatchId) -> OrchestrationResult<bool> {
        let (batch, subtasks) = self.load(id).await?;
        if subtasks.is_empty() || !subtasks.iter().all(Subtask::is_terminal) {
            return Ok(false);
        }
        if batch.is_terminal() {
            return Ok(true);
        }

        let synthesis = self.synthesize(&batch, &subtasks)?;
        if let Some(finalized) = self.batches.finalize(id, &synthesis, Utc::now()).await? {
            self.announce_batch(&finalized, &synthesis);
            self.check_request_completion(finalized.request_id).await?;
        }
        Ok(true)
    }

    /// Explicit completion: recompute counts from the subtasks, store the
    /// synthesis and terminal status. On an already terminal batch the stored
    /// synthesis is returned.
    pub async fn complete_batch(&self, id: BatchId) -> OrchestrationResult<Synthesis> {
        let (batch, subtasks) = self.load(id).await?;
        if let (true, Some(stored)) = (batch.is_terminal(), batch.synthesis.clone()) {
            return Ok(stored);
        }

        let synthesis = self.synthesize(&batch, &subtasks)?;
        match self.batches.finalize(id, &synthesis, Utc::now()).await? {
            Some(finalized) => {
                self.announce_batch(&finalized, &synthesis);
                self.check_request_completion(finalized.request_id).await?;
                Ok(synthesis)
            }
            None => {
                debug!(batch_id = %id, "Batch finalized concurrently, returning stored synthesis");
                let (batch, _) = self.load(id).await?;
                Ok(batch.synthesis.unwrap_or(synthesis))
            }
        }
    }

    /// Terminal once every wave of the request is terminal; `failed` if any
    /// wave failed. Safe to call redundantly.
    pub async fn check_request_completion(&self, id: RequestId) -> OrchestrationResult<Option<Request>> {
        let finished = self.requests.finish_if_settled(id, Utc::now()).await?;
        if let Some(request) = &finished {
            info!(request_id = %request.id, status = request.status.as_str(), "Request reached terminal status");
            self.event_bus.publish_orchestration_event(OrchestrationEvent::RequestCompleted {
                request_id: request.id,
                session_id: request.session_id.clone(),
                status: request.status,
                completed_at: request.completed_at.unwrap_or_else(Utc::now),
            });
        }
        Ok(finished)
    }

    fn announce_batch(&self, batch: &Batch, synthesis: &Synthesis) {
        info!(
            batch_id = %batch.id,
            status = batch.status.as_str(),
            completed = synthesis.stats.completed,
            failed = synthesis.stats.failed,
            conflicts = synthesis.conflicts.len(),
            tokens_saved = synthesis.tokens_saved,
            "Batch completed"
        );
        metrics::counter!("conductor_batches_completed_total", "status" => batch.status.as_str()).increment(1);
        for conflict in &synthesis.conflicts {
            metrics::counter!("conductor_conflicts_detected_total", "kind" => conflict.kind.as_str()).increment(1);
        }
        self.event_bus.publish_orchestration_event(OrchestrationEvent::BatchCompleted {
            batch_id: batch.id,
            session_id: batch.session_id.clone(),
            wave_number: batch.wave_number,
            status: batch.status,
            next_wave_ready: synthesis.next_wave_ready,
            conflict_count: synthesis.conflicts.len(),
            completed_at: batch.completed_at.unwrap_or_else(Utc::now),
        });
    }
}
