// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Character-count token heuristics shared by capacity tracking, batch
//! synthesis and restore-brief rendering.

/// Characters per token used when no configured policy is at hand.
pub const CHARS_PER_TOKEN: usize = 4;

pub const TRUNCATION_MARKER: &str = "\n\n[... truncated to fit token budget ...]";

/// `round(chars / 4)`
pub fn estimate_tokens(chars: usize) -> u64 {
    ((chars + CHARS_PER_TOKEN / 2) / CHARS_PER_TOKEN) as u64
}

/// `ceil(chars / chars_per_token)`, used for metered usage.
pub fn ceil_tokens(chars: u64, chars_per_token: u64) -> u64 {
    let divisor = chars_per_token.max(1);
    chars.div_ceil(divisor)
}

/// Cut `text` to `max_tokens * 4` characters and append the truncation
/// marker. Text already within budget is returned untouched.
pub fn truncate_to_budget(text: &str, max_tokens: usize) -> String {
    let limit = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    match text.char_indices().nth(limit) {
        None => text.to_string(),
        Some((cut, _)) => {
            let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
            out.push_str(&text[..cut]);
            out.push_str(TRUNCATION_MARKER);
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_appends_marker() {
        let text = "a".repeat(100);
        let out = truncate_to_budget(&text, 10);
        assert!(out.starts_with(&"a".repeat(40)));
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.len(), 40 + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_short_text_is_untouched() {
        assert_eq!(truncate_to_budget("short", 10), "short");
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "é".repeat(20);
        let out = truncate_to_budget(&text, 1);
        assert!(out.starts_with("éééé"));
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_ceil_tokens() {
        assert_eq!(ceil_tokens(9, 4), 3);
        assert_eq!(ceil_tokens(8, 4), 2);
        assert_eq!(ceil_tokens(0, 4), 0);
    }
}
