// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Complexity Estimation
//!
//! Keyword tiers checked from `expert` down to `trivial`; the first tier with
//! a keyword contained in the lower-cased description wins. Without a keyword
//! hit the file count decides. Both tables are plain data in
//! [`ComplexityPolicy`] so they can be retuned without touching callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Trivial,
    Simple,
    Moderate,
    Complex,
    Expert,
}

impl ComplexityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ComplexityTier::Trivial => "trivial",
            ComplexityTier::Simple => "simple",
            ComplexityTier::Moderate => "moderate",
            ComplexityTier::Complex => "complex",
            ComplexityTier::Expert => "expert",
        }
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplexityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trivial" => Ok(ComplexityTier::Trivial),
            "simple" => Ok(ComplexityTier::Simple),
            "moderate" => Ok(ComplexityTier::Moderate),
            "complex" => Ok(ComplexityTier::Complex),
            "expert" => Ok(ComplexityTier::Expert),
            other => Err(format!("unknown complexity tier '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffortLevel {
    Low,
    Medium,
    High,
    Max,
}

impl EffortLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EffortLevel::Low => "low",
            EffortLevel::Medium => "medium",
            EffortLevel::High => "high",
            EffortLevel::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRule {
    pub tier: ComplexityTier,
    pub keywords: Vec<String>,
    pub max_turns: u32,
    pub effort: EffortLevel,
}

/// Upper bound (inclusive) on file count for a tier in the fallback table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileThreshold {
    pub max_files: usize,
    pub tier: ComplexityTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityPolicy {
    /// Ordered from highest tier to lowest.
    pub tiers: Vec<TierRule>,
    pub file_thresholds: Vec<FileThreshold>,
    /// Tier used when the file count exceeds every threshold.
    pub overflow_tier: ComplexityTier,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

impl Default for ComplexityPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierRule {
                    tier: ComplexityTier::Expert,
                    keywords: words(&[
                        "security audit",
                        "architecture",
                        "migration",
                        "distributed",
                        "redesign",
                        "audit",
                        "from scratch",
                        "rewrite",
                    ]),
                    max_turns: 50,
                    effort: EffortLevel::Max,
                },
                TierRule {
                    tier: ComplexityTier::Complex,
                    keywords: words(&[
                        "refactor",
                        "integrat",
                        "authentication",
                        "database schema",
                        "concurrency",
                        "optimiz",
                    ]),
                    max_turns: 35,
                    effort: EffortLevel::High,
                },
                TierRule {
                    tier: ComplexityTier::Moderate,
                    keywords: words(&["implement", "feature", "endpoint", "component", "api"]),
                    max_turns: 20,
                    effort: EffortLevel::Medium,
                },
                TierRule {
                    tier: ComplexityTier::Simple,
                    keywords: words(&["bug", "update", "adjust", "tweak", "add test", "docs", "rename"]),
                    max_turns: 10,
                    effort: EffortLevel::Low,
                },
                TierRule {
                    tier: ComplexityTier::Trivial,
                    keywords: words(&["typo", "comment", "formatting", "whitespace", "bump version"]),
                    max_turns: 5,
                    effort: EffortLevel::Low,
                },
            ],
            file_thresholds: vec![
                FileThreshold { max_files: 1, tier: ComplexityTier::Trivial },
                FileThreshold { max_files: 3, tier: ComplexityTier::Simple },
                FileThreshold { max_files: 8, tier: ComplexityTier::Moderate },
                FileThreshold { max_files: 15, tier: ComplexityTier::Complex },
            ],
            overflow_tier: ComplexityTier::Expert,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityEstimate {
    pub tier: ComplexityTier,
    pub max_turns: u32,
    pub effort: EffortLevel,
    /// Keyword that decided the tier; `None` when the file count did.
    pub matched_keyword: Option<String>,
}

impl ComplexityPolicy {
    pub fn estimate(&self, description: &str, file_count: usize) -> ComplexityEstimate {
        let lowered = description.to_lowercase();
        for rule in &self.tiers {
            if let Some(keyword) = rule.keywords.iter().find(|k| lowered.contains(k.as_str())) {
                return ComplexityEstimate {
                    tier: rule.tier,
                    max_turns: rule.max_turns,
                    effort: rule.effort,
                    matched_keyword: Some(keyword.clone()),
                };
            }
        }

        let tier = self
            .file_thresholds
            .iter()
            .find(|t| file_count <= t.max_files)
            .map(|t| t.tier)
            .unwrap_or(self.overflow_tier);
        let (max_turns, effort) = self.budget(tier);
        ComplexityEstimate {
            tier,
            max_turns,
            effort,
            matched_keyword: None,
        }
    }

    pub fn budget(&self, tier: ComplexityTier) -> (u32, EffortLevel) {
        self.tiers
            .iter()
            .find(|r| r.tier == tier)
            .map(|r| (r.max_turns, r.effort))
            .unwrap_or((20, EffortLevel::Medium))
    }
}

/// Estimate with the built-in tables.
pub fn estimate_complexity(description: &str, file_count: usize) -> ComplexityEstimate {
    ComplexityPolicy::default().estimate(description, file_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typo_fix_is_trivial() {
        let estimate = estimate_complexity("fix typo in config", 1);
        assert_eq!(estimate.tier, ComplexityTier::Trivial);
        assert_eq!(estimate.max_turns, 5);
    }

    #[test]
    fn test_keyword_beats_file_count() {
        let estimate = estimate_complexity("full security audit", 20);
        assert_eq!(estimate.tier, ComplexityTier::Expert);
        assert_eq!(estimate.effort, EffortLevel::Max);
        assert_eq!(estimate.matched_keyword.as_deref(), Some("security audit"));

        let estimate = estimate_complexity("Fix TYPO", 40);
        assert_eq!(estimate.tier, ComplexityTier::Trivial);
    }

    #[test]
    fn test_higher_tier_wins_when_several_match() {
        let estimate = estimate_complexity("refactor the endpoint and fix a typo", 0);
        assert_eq!(estimate.tier, ComplexityTier::Complex);
    }

    #[test]
    fn test_file_count_fallback() {
        let cases = [
            (0, ComplexityTier::Trivial),
            (1, ComplexityTier::Trivial),
            (3, ComplexityTier::Simple),
            (8, ComplexityTier::Moderate),
            (15, ComplexityTier::Complex),
            (16, ComplexityTier::Expert),
        ];
        for (files, tier) in cases {
            assert_eq!(estimate_complexity("do the thing", files).tier, tier, "{files} files");
        }
    }
}
