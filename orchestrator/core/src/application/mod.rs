// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod aggregation;
pub mod batch_orchestrator;
pub mod capacity_controller;
pub mod cascade;
pub mod decomposer;
pub mod engine;
pub mod proactive_compaction;
pub mod prompt_crafter;
pub mod repository_factory;
pub mod snapshot_manager;
pub mod subtask_service;
pub mod wave_scheduler;

// Re-export the services for convenience
pub use aggregation::AggregationEngine;
pub use batch_orchestrator::{BatchOrchestrator, BatchTaskSpec, BatchView, SubmitBatch};
pub use capacity_controller::CapacityController;
pub use decomposer::TaskDecomposer;
pub use engine::{CascadeWorker, Conductor};
pub use prompt_crafter::{CraftedPrompt, PromptCrafter, PromptRequest};
pub use repository_factory::{create_stores, Stores};
pub use snapshot_manager::{RestoreBrief, RestoreRequest, SnapshotManager};
pub use subtask_service::{CreateSubtask, SubtaskService};
pub use wave_scheduler::WaveScheduler;
