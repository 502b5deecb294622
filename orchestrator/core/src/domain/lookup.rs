// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Degraded Lookups
//!
//! Secondary lookups (agent scope registry, prior-wave results, session
//! state for restore briefs) must never fail the operation that needs them.
//! Each one returns `Result<T, DegradedLookupError>` and the call site picks
//! the fallback explicitly with [`DegradeExt::or_degraded`].

use std::fmt::Display;
use tracing::warn;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{what} lookup failed: {reason}")]
pub struct DegradedLookupError {
    pub what: &'static str,
    pub reason: String,
}

impl DegradedLookupError {
    pub fn new(what: &'static str, reason: impl Display) -> Self {
        Self {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Turn any displayable error into a [`DegradedLookupError`].
pub trait IntoDegraded<T> {
    fn degrade(self, what: &'static str) -> Result<T, DegradedLookupError>;
}

impl<T, E: Display> IntoDegraded<T> for Result<T, E> {
    fn degrade(self, what: &'static str) -> Result<T, DegradedLookupError> {
        self.map_err(|e| DegradedLookupError::new(what, e))
    }
}

pub trait DegradeExt<T> {
    /// Use the value, or log the failure and continue with `T::default()`.
    fn or_degraded(self, context: &str) -> T
    where
        T: Default;
}

impl<T> DegradeExt<T> for Result<T, DegradedLookupError> {
    fn or_degraded(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(err) => {
                warn!(lookup = err.what, reason = %err.reason, context, "Degraded lookup, continuing with default");
                metrics::counter!("conductor_degraded_lookups_total", "lookup" => err.what).increment(1);
                T::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_degrades_to_default() {
        let failed: Result<Vec<String>, &str> = Err("registry offline");
        let value = failed.degrade("agent scope").or_degraded("craft_prompt");
        assert!(value.is_empty());
    }

    #[test]
    fn test_success_passes_through() {
        let ok: Result<Option<u32>, String> = Ok(Some(3));
        assert_eq!(ok.degrade("x").or_degraded("test"), Some(3));
    }

    #[test]
    fn test_error_message_names_lookup() {
        let err = DegradedLookupError::new("prior wave results", "timeout");
        assert_eq!(err.to_string(), "prior wave results lookup failed: timeout");
    }
}
