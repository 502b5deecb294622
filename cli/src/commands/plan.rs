// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Offline planning commands: `plan` and `estimate`.
//!
//! Both run the pure decomposition functions; no store or daemon is involved.

use anyhow::{Context, Result};
use clap::Args;

use conductor_core::application::TaskDecomposer;
use conductor_core::domain::complexity::ComplexityEstimate;
use conductor_core::domain::decomposition::{DecompositionConstraints, WavePlan};

#[derive(Args)]
pub struct PlanArgs {
    /// Task description
    #[arg(value_name = "TASK")]
    pub description: String,

    /// Maximum number of parallel agents in the implementation wave
    #[arg(long, default_value_t = 3)]
    pub max_parallel: usize,

    /// Turn budget across every step of the plan
    #[arg(long, default_value_t = 100)]
    pub max_total_turns: u32,
}

#[derive(Args)]
pub struct EstimateArgs {
    /// Task description
    #[arg(value_name = "TASK")]
    pub description: String,

    /// Number of files the task is expected to touch
    #[arg(long, default_value_t = 1)]
    pub files: usize,
}

pub fn build_plan(args: &PlanArgs) -> Result<WavePlan> {
    let constraints = DecompositionConstraints {
        max_parallel: args.max_parallel,
        max_total_turns: args.max_total_turns,
    };
    TaskDecomposer::default()
        .decompose(&args.description, constraints)
        .context("Failed to decompose task")
}

pub fn build_estimate(args: &EstimateArgs) -> Result<ComplexityEstimate> {
    TaskDecomposer::default()
        .estimate(&args.description, args.files)
        .context("Failed to estimate task")
}

pub fn plan(args: PlanArgs) -> Result<()> {
    let plan = build_plan(&args)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

pub fn estimate(args: EstimateArgs) -> Result<()> {
    let estimate = build_estimate(&args)?;
    println!(
        "{} (max_turns={}, effort={})",
        estimate.tier.as_str(),
        estimate.max_turns,
        estimate.effort.as_str()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::domain::complexity::ComplexityTier;

    #[test]
    fn test_keyword_beats_file_count() {
        let trivial = build_estimate(&EstimateArgs {
            description: "fix typo in config".into(),
            files: 1,
        })
        .unwrap();
        assert_eq!(trivial.tier, ComplexityTier::Trivial);

        let expert = build_estimate(&EstimateArgs {
            description: "full security audit".into(),
            files: 20,
        })
        .unwrap();
        assert_eq!(expert.tier, ComplexityTier::Expert);
    }

    #[test]
    fn test_plan_has_three_waves() {
        let plan = build_plan(&PlanArgs {
            description: "add an api endpoint with tests".into(),
            max_parallel: 2,
            max_total_turns: 100,
        })
        .unwrap();
        assert_eq!(plan.wave_count(), 3);
        assert!(plan.wave(1).count() <= 2);
    }

    #[test]
    fn test_zero_parallelism_is_rejected() {
        let result = build_plan(&PlanArgs {
            description: "anything".into(),
            max_parallel: 0,
            max_total_turns: 100,
        });
        assert!(result.is_err());
    }
}
