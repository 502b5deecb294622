// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Capacity (Backpressure)
//!
//! One [`AgentCapacity`] row per agent tracks how much of its context budget
//! it has consumed. Every metered tool call updates usage, the smoothed
//! consumption rate and the [`Zone`], and appends a [`TokenLedgerEntry`].
//!
//! All thresholds and the smoothing constant live in [`CapacityPolicy`] so
//! they can be tuned from configuration.

use crate::domain::agent::AgentId;
use crate::domain::session::SessionId;
use crate::domain::tokens::ceil_tokens;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneThresholds {
    pub yellow: f64,
    pub orange: f64,
    pub red: f64,
    pub critical: f64,
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self {
            yellow: 50.0,
            orange: 70.0,
            red: 85.0,
            critical: 95.0,
        }
    }
}

impl ZoneThresholds {
    pub fn is_strictly_increasing(&self) -> bool {
        let ordered = [self.yellow, self.orange, self.red, self.critical];
        ordered[0] > 0.0 && ordered[3] <= 100.0 && ordered.windows(2).all(|w| w[0] < w[1])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityPolicy {
    pub max_capacity: u64,
    pub chars_per_token: u64,
    /// Upper bound on tokens credited for a single call.
    pub per_call_token_cap: u64,
    /// Weight of the newest sample in the consumption-rate EMA.
    pub ema_alpha: f64,
    pub thresholds: ZoneThresholds,
    pub compact_cooldown_seconds: u64,
    /// Share of usage that survives a compaction.
    pub reset_retention_ratio: f64,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            max_capacity: 200_000,
            chars_per_token: 4,
            per_call_token_cap: 50_000,
            ema_alpha: 0.3,
            thresholds: ZoneThresholds::default(),
            compact_cooldown_seconds: 120,
            reset_retention_ratio: 0.2,
        }
    }
}

impl CapacityPolicy {
    /// `min(ceil((input + output) / chars_per_token), per_call_token_cap)`
    pub fn estimate_call_tokens(&self, input_size: u64, output_size: u64) -> u64 {
        ceil_tokens(input_size.saturating_add(output_size), self.chars_per_token)
            .min(self.per_call_token_cap)
    }

    pub fn classify(&self, usage_percent: f64) -> Zone {
        let t = &self.thresholds;
        if usage_percent >= t.critical {
            Zone::Critical
        } else if usage_percent >= t.red {
            Zone::Red
        } else if usage_percent >= t.orange {
            Zone::Orange
        } else if usage_percent >= t.yellow {
            Zone::Yellow
        } else {
            Zone::Green
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.compact_cooldown_seconds as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Green,
    Yellow,
    Orange,
    Red,
    Critical,
}

impl Zone {
    /// Orange and above publish capacity warnings.
    pub fn is_warning(self) -> bool {
        self >= Zone::Orange
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Zone::Green => "green",
            Zone::Yellow => "yellow",
            Zone::Orange => "orange",
            Zone::Red => "red",
            Zone::Critical => "critical",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Zone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "green" => Ok(Zone::Green),
            "yellow" => Ok(Zone::Yellow),
            "orange" => Ok(Zone::Orange),
            "red" => Ok(Zone::Red),
            "critical" => Ok(Zone::Critical),
            other => Err(format!("unknown zone '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapacity {
    pub agent_id: AgentId,
    pub session_id: Option<SessionId>,
    pub current_usage: u64,
    pub max_capacity: u64,
    pub consumption_rate: f64,
    pub usage_percent: f64,
    pub zone: Zone,
    pub predicted_exhaustion_minutes: Option<f64>,
    pub compact_count: u32,
    pub last_compact_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentCapacity {
    pub fn new(agent_id: AgentId, session_id: Option<SessionId>, policy: &CapacityPolicy) -> Self {
        let now = Utc::now();
        Self {
            agent_id,
            session_id,
            current_usage: 0,
            max_capacity: policy.max_capacity,
            consumption_rate: 0.0,
            usage_percent: 0.0,
            zone: Zone::Green,
            predicted_exhaustion_minutes: None,
            compact_count: 0,
            last_compact_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Credit `tokens` of usage, update the EMA rate and reclassify.
    pub fn record_usage(&mut self, tokens: u64, policy: &CapacityPolicy, at: DateTime<Utc>) {
        self.current_usage = self.current_usage.saturating_add(tokens);
        self.consumption_rate =
            policy.ema_alpha * tokens as f64 + (1.0 - policy.ema_alpha) * self.consumption_rate;
        self.updated_at = at;
        self.reclassify(policy);
    }

    /// Apply a compaction: usage decays to the retention ratio, zone resets
    /// to green and the compaction is stamped.
    pub fn apply_compaction(&mut self, policy: &CapacityPolicy, at: DateTime<Utc>) {
        self.current_usage = (self.current_usage as f64 * policy.reset_retention_ratio).round() as u64;
        self.compact_count += 1;
        self.last_compact_at = Some(at);
        self.updated_at = at;
        self.reclassify(policy);
        self.zone = Zone::Green;
    }

    fn reclassify(&mut self, policy: &CapacityPolicy) {
        self.usage_percent = if self.max_capacity == 0 {
            100.0
        } else {
            self.current_usage as f64 / self.max_capacity as f64 * 100.0
        };
        self.zone = policy.classify(self.usage_percent);
        self.predicted_exhaustion_minutes = if self.consumption_rate > 0.0 {
            Some(self.max_capacity.saturating_sub(self.current_usage) as f64 / self.consumption_rate)
        } else {
            None
        };
    }

    pub fn remaining(&self) -> u64 {
        self.max_capacity.saturating_sub(self.current_usage)
    }

    /// True when the agent never compacted or the cooldown has passed.
    pub fn cooldown_elapsed(&self, policy: &CapacityPolicy, now: DateTime<Utc>) -> bool {
        match self.last_compact_at {
            None => true,
            Some(at) => now - at >= policy.cooldown(),
        }
    }

    pub fn should_intervene(&self, policy: &CapacityPolicy, now: DateTime<Utc>) -> bool {
        self.zone >= Zone::Orange && self.cooldown_elapsed(policy, now)
    }

    pub fn should_compact(&self, policy: &CapacityPolicy, now: DateTime<Utc>) -> bool {
        self.zone >= Zone::Red && self.cooldown_elapsed(policy, now)
    }

    pub fn health(&self, policy: &CapacityPolicy, now: DateTime<Utc>) -> ContextHealth {
        let cooldown_remaining_seconds = self
            .last_compact_at
            .map(|at| (policy.cooldown() - (now - at)).num_seconds().max(0) as u64)
            .unwrap_or(0);
        let should_compact = self.should_compact(policy, now);
        let should_intervene = self.should_intervene(policy, now);
        let recommendation = match (self.zone, should_compact, should_intervene) {
            (_, true, _) => "Save a snapshot and compact now",
            (_, false, true) => "Wrap up the current step and prepare to compact",
            (Zone::Green | Zone::Yellow, _, _) => "Healthy",
            _ => "Recently compacted; waiting for cooldown",
        };
        ContextHealth {
            agent_id: self.agent_id.clone(),
            zone: self.zone,
            usage_percent: self.usage_percent,
            current_usage: self.current_usage,
            max_capacity: self.max_capacity,
            remaining: self.remaining(),
            consumption_rate: self.consumption_rate,
            predicted_exhaustion_minutes: self.predicted_exhaustion_minutes,
            should_intervene,
            should_compact,
            cooldown_remaining_seconds,
            recommendation: recommendation.to_string(),
        }
    }
}

/// Read-only health view derived from an [`AgentCapacity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextHealth {
    pub agent_id: AgentId,
    pub zone: Zone,
    pub usage_percent: f64,
    pub current_usage: u64,
    pub max_capacity: u64,
    pub remaining: u64,
    pub consumption_rate: f64,
    pub predicted_exhaustion_minutes: Option<f64>,
    pub should_intervene: bool,
    pub should_compact: bool,
    pub cooldown_remaining_seconds: u64,
    pub recommendation: String,
}

/// Immutable record of one metered call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLedgerEntry {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub tool_name: String,
    pub input_size: u64,
    pub output_size: u64,
    pub tokens: u64,
    pub usage_after: u64,
    pub zone_after: Zone,
    pub recorded_at: DateTime<Utc>,
}

/// One metered tool call, as reported by the hook layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub tool_name: String,
    pub input_size: u64,
    pub output_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity() -> AgentCapacity {
        AgentCapacity::new(AgentId::from("agent-1"), None, &CapacityPolicy::default())
    }

    #[test]
    fn test_per_call_cap_applies() {
        let policy = CapacityPolicy::default();
        assert_eq!(policy.estimate_call_tokens(10, 1), 3);
        assert_eq!(policy.estimate_call_tokens(10_000_000, 0), 50_000);
    }

    #[test]
    fn test_zone_boundaries() {
        let policy = CapacityPolicy::default();
        assert_eq!(policy.classify(49.9), Zone::Green);
        assert_eq!(policy.classify(50.0), Zone::Yellow);
        assert_eq!(policy.classify(70.0), Zone::Orange);
        assert_eq!(policy.classify(85.0), Zone::Red);
        assert_eq!(policy.classify(95.0), Zone::Critical);
    }

    #[test]
    fn test_rate_decays_toward_zero_after_bursts() {
        let policy = CapacityPolicy::default();
        let mut cap = capacity();
        let now = Utc::now();
        for _ in 0..3 {
            cap.record_usage(40_000, &policy, now);
        }
        let peak = cap.consumption_rate;
        let mut previous = peak;
        for _ in 0..30 {
            cap.record_usage(0, &policy, now);
            assert!(cap.consumption_rate < previous);
            previous = cap.consumption_rate;
        }
        assert!(cap.consumption_rate < peak * 0.001);
    }

    #[test]
    fn test_compaction_keeps_twenty_percent() {
        let policy = CapacityPolicy::default();
        let mut cap = capacity();
        let now = Utc::now();
        cap.record_usage(50_000, &policy, now);
        cap.record_usage(50_000, &policy, now);
        cap.record_usage(50_000, &policy, now);
        assert_eq!(cap.zone, Zone::Orange);

        cap.apply_compaction(&policy, now);
        assert_eq!(cap.current_usage, 30_000);
        assert_eq!(cap.zone, Zone::Green);
        assert_eq!(cap.compact_count, 1);
        assert_eq!(cap.last_compact_at, Some(now));
    }

    #[test]
    fn test_exhaustion_prediction_absent_without_rate() {
        let policy = CapacityPolicy::default();
        let mut cap = capacity();
        cap.record_usage(0, &policy, Utc::now());
        assert_eq!(cap.predicted_exhaustion_minutes, None);

        cap.record_usage(1_000, &policy, Utc::now());
        let expected = (200_000.0 - 1_000.0) / 300.0;
        let predicted = cap.predicted_exhaustion_minutes.unwrap();
        assert!((predicted - expected).abs() < 1e-6);
    }

    #[test]
    fn test_cooldown_gates_compaction() {
        let policy = CapacityPolicy::default();
        let mut cap = capacity();
        let now = Utc::now();
        cap.record_usage(50_000, &policy, now);
        cap.record_usage(50_000, &policy, now);
        cap.record_usage(50_000, &policy, now);
        cap.record_usage(30_000, &policy, now);
        assert_eq!(cap.zone, Zone::Red);
        assert!(cap.should_compact(&policy, now));

        cap.last_compact_at = Some(now - Duration::seconds(30));
        assert!(!cap.should_compact(&policy, now));
        assert!(!cap.should_intervene(&policy, now));
        assert_eq!(cap.health(&policy, now).cooldown_remaining_seconds, 90);

        cap.last_compact_at = Some(now - Duration::seconds(121));
        assert!(cap.should_compact(&policy, now));
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(ZoneThresholds::default().is_strictly_increasing());
        let broken = ZoneThresholds {
            yellow: 60.0,
            orange: 50.0,
            ..Default::default()
        };
        assert!(!broken.is_strictly_increasing());
    }
}
