// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task Decomposer Application Service
//!
//! Validates planning input and runs the pure estimation and decomposition
//! functions over the configured policy tables.

use crate::domain::complexity::{ComplexityEstimate, ComplexityPolicy};
use crate::domain::decomposition::{decompose, ArchetypeRegistry, DecompositionConstraints, WavePlan};
use crate::domain::error::{OrchestrationError, OrchestrationResult};
use tracing::info;

pub struct TaskDecomposer {
    registry: ArchetypeRegistry,
    complexity: ComplexityPolicy,
}

impl Default for TaskDecomposer {
    fn default() -> Self {
        Self::new(ArchetypeRegistry::default(), ComplexityPolicy::default())
    }
}

impl TaskDecomposer {
    pub fn new(registry: ArchetypeRegistry, complexity: ComplexityPolicy) -> Self {
        Self { registry, complexity }
    }

    pub fn complexity_policy(&self) -> &ComplexityPolicy {
        &self.complexity
    }

    pub fn estimate(&self, description: &str, file_count: usize) -> OrchestrationResult<ComplexityEstimate> {
        require_description(description)?;
        Ok(self.complexity.estimate(description, file_count))
    }

    pub fn decompose(
        &self,
        description: &str,
        constraints: DecompositionConstraints,
    ) -> OrchestrationResult<WavePlan> {
        require_description(description)?;
        if constraints.max_parallel == 0 {
            return Err(OrchestrationError::Validation(
                "constraints.max_parallel must be at least 1".to_string(),
            ));
        }
        if constraints.max_total_turns == 0 {
            return Err(OrchestrationError::Validation(
                "constraints.max_total_turns must be at least 1".to_string(),
            ));
        }

        let plan = decompose(description, constraints, &self.registry, &self.complexity);
        info!(
            tier = plan.complexity.tier.as_str(),
            steps = plan.steps.len(),
            total_turns = plan.total_turns,
            scaled = plan.scale_factor.is_some(),
            "Task decomposed"
        );
        Ok(plan)
    }
}

fn require_description(description: &str) -> OrchestrationResult<()> {
    if description.trim().is_empty() {
        return Err(OrchestrationError::Validation(
            "task_description must not be empty".to_string(),
        ));
    }
    Ok(())
}
