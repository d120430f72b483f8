//! Text utility functions for the Ember core library.

/// Opening delimiter wrapped around reasoning segments.
pub const THINK_OPEN: &str = "<think>";

/// Closing delimiter wrapped around reasoning segments.
pub const THINK_CLOSE: &str = "</think>";

/// Cut `s` to at most `max_chars` characters, ending in `...` when cut.
///
/// Limits of three or fewer leave only dots. Counts characters, not bytes.
pub fn truncate(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else if max_chars <= 3 {
        ".".repeat(max_chars)
    } else {
        let truncated: String = s.chars().take(max_chars - 3).collect();
        format!("{}...", truncated)
    }
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(s: &str) -> usize {
    s.chars().count().div_ceil(4)
}

/// Split text into `(answer, reasoning)` by removing `<think>` segments.
///
/// An unterminated segment runs to the end of the text.
pub fn split_reasoning(text: &str) -> (String, String) {
    let mut answer = String::new();
    let mut reasoning = String::new();
    let mut rest = text;

    while let Some(start) = rest.find(THINK_OPEN) {
        answer.push_str(&rest[..start]);
        let after = &rest[start + THINK_OPEN.len()..];
        match after.find(THINK_CLOSE) {
            Some(end) => {
                reasoning.push_str(&after[..end]);
                rest = &after[end + THINK_CLOSE.len()..];
            }
            None => {
                reasoning.push_str(after);
                rest = "";
            }
        }
    }
    answer.push_str(rest);
    (answer, reasoning)
}
