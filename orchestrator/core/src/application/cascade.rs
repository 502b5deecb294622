// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Completion cascades run on the background job queue.
//!
//! A subtask reaching a terminal status is persisted first; everything that
//! follows from it (wave and batch counters, batch and request settlement,
//! the result broadcast, the agent context row) happens here, after the
//! caller already has its response. Failures are logged by the worker.

use super::aggregation::AggregationEngine;
use super::wave_scheduler::WaveScheduler;
use crate::domain::agent::AgentContext;
use crate::domain::coordination::CoordinationPort;
use crate::domain::error::{OrchestrationError, OrchestrationResult};
use crate::domain::repository::{AgentContextRepository, BatchRepository};
use crate::domain::session::RequestId;
use crate::domain::subtask::{Subtask, SubtaskStatus};
use crate::infrastructure::job_queue::{Job, JobHandler, JobQueue};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum CascadeJob {
    /// Wave counters, then batch settlement, then request settlement.
    SubtaskTerminal { subtask: Subtask },
    BroadcastResult { subtask: Subtask },
    PopulateAgentContext { subtask: Subtask },
    CheckRequestCompletion { request_id: RequestId },
}

impl Job for CascadeJob {
    fn name(&self) -> &'static str {
        match self {
            CascadeJob::SubtaskTerminal { .. } => "subtask_terminal",
            CascadeJob::BroadcastResult { .. } => "broadcast_result",
            CascadeJob::PopulateAgentContext { .. } => "populate_agent_context",
            CascadeJob::CheckRequestCompletion { .. } => "check_request_completion",
        }
    }
}

pub type CascadeQueue = JobQueue<CascadeJob>;

pub struct CascadeHandler {
    scheduler: Arc<WaveScheduler>,
    aggregation: Arc<AggregationEngine>,
    batches: Arc<dyn BatchRepository>,
    contexts: Arc<dyn AgentContextRepository>,
    coordination: Arc<dyn CoordinationPort>,
}

impl CascadeHandler {
    pub fn new(
        scheduler: Arc<WaveScheduler>,
        aggregation: Arc<AggregationEngine>,
        batches: Arc<dyn BatchRepository>,
        contexts: Arc<dyn AgentContextRepository>,
        coordination: Arc<dyn CoordinationPort>,
    ) -> Self {
        Self {
            scheduler,
            aggregation,
            batches,
            contexts,
            coordination,
        }
    }

    async fn subtask_terminal(&self, subtask: &Subtask) -> OrchestrationResult<()> {
        let failed = subtask.status == SubtaskStatus::Failed;
        let progress = self.scheduler.record_outcome(subtask.wave_id, failed).await?;
        debug!(
            subtask_id = %subtask.id,
            wave_number = progress.wave.wave_number,
            counted = progress.counted,
            "Wave outcome recorded"
        );

        if let Some(batch_id) = subtask.batch_id {
            self.batches.increment_outcome(batch_id, failed).await?;
            self.aggregation.check_batch_completion(batch_id).await?;
        }
        if progress.became_terminal.is_some() {
            self.aggregation.check_request_completion(subtask.request_id).await?;
        }
        Ok(())
    }

    async fn populate_agent_context(&self, subtask: &Subtask) -> OrchestrationResult<()> {
        let Some(agent_id) = subtask.agent_id.clone() else {
            return Ok(());
        };
        let mut context = self
            .contexts
            .find(&subtask.session_id, &agent_id)
            .await?
            .unwrap_or_else(|| AgentContext {
                agent_id,
                session_id: subtask.session_id.clone(),
                agent_type: None,
                current_subtask: None,
                status: String::new(),
                last_summary: None,
                files_touched: Vec::new(),
                updated_at: Utc::now(),
            });

        if subtask.agent_type.is_some() {
            context.agent_type = subtask.agent_type.clone();
        }
        context.current_subtask = (!subtask.is_terminal()).then_some(subtask.id);
        context.status = subtask.status.as_str().to_string();
        if let Some(summary) = subtask.result.as_ref().and_then(|r| r.summary.clone()) {
            context.last_summary = Some(summary);
        }
        context.touch_files(subtask.referenced_files());
        context.updated_at = Utc::now();
        self.contexts.upsert(&context).await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler<CascadeJob> for CascadeHandler {
    type Error = OrchestrationError;

    async fn handle(&self, job: CascadeJob) -> Result<(), Self::Error> {
        match job {
            CascadeJob::SubtaskTerminal { subtask } => self.subtask_terminal(&subtask).await,
            CascadeJob::BroadcastResult { subtask } => self
                .coordination
                .broadcast_subtask_result(&subtask)
                .await
                .map_err(|e| OrchestrationError::Coordination(e.0)),
            CascadeJob::PopulateAgentContext { subtask } => self.populate_agent_context(&subtask).await,
            CascadeJob::CheckRequestCompletion { request_id } => {
                self.aggregation.check_request_completion(request_id).await.map(|_| ())
            }
        }
    }
}
