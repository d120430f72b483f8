//! Context-window recovery by shrinking function results.
//!
//! Function results dominate the prompt in long tool-using turns, so they
//! are the only text rewritten. Every result is cut to at most half of its
//! estimated tokens, which puts the total at or below half of what it was.

use crate::message::Message;
use crate::text::{estimate_tokens, truncate};

/// Estimated tokens before and after a compression pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    pub before: usize,
    pub after: usize,
}

/// Estimated tokens across all function results in `messages`.
pub fn function_result_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter_map(|m| m.function_results.as_ref())
        .flatten()
        .map(|r| estimate_tokens(&r.result))
        .sum()
}

/// Shrink every function result in `messages`.
///
/// Returns `None`, leaving the messages untouched, when there is nothing to
/// shrink or the estimate would not go down.
pub fn compress(messages: &mut [Message]) -> Option<Compression> {
    let before = function_result_tokens(messages);
    if before == 0 {
        return None;
    }

    let mut shrunk: Vec<Message> = messages.to_vec();
    for result in shrunk
        .iter_mut()
        .filter_map(|m| m.function_results.as_mut())
        .flatten()
    {
        let budget = estimate_tokens(&result.result) / 2;
        // Budgets are multiples of four, so the `...` suffix always fits.
        result.result = truncate(&result.result, budget * 4);
    }

    let after = function_result_tokens(&shrunk);
    if after >= before {
        return None;
    }
    messages.clone_from_slice(&shrunk);
    tracing::debug!(before, after, "compress: shrank function results");
    Some(Compression { before, after })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::tools::FunctionCallResult;

    fn with_results(results: &[&str]) -> Vec<Message> {
        vec![
            Message::new(Role::User, "find things"),
            Message::new(Role::Assistant, "calling"),
            Message::function_results(
                results
                    .iter()
                    .map(|r| FunctionCallResult::success("search()", *r))
                    .collect(),
                "continue",
            ),
        ]
    }

    #[test]
    fn test_nothing_to_compress() {
        let mut messages = vec![Message::new(Role::User, "hello")];
        assert_eq!(compress(&mut messages), None);
    }

    #[test]
    fn test_halves_total_estimate() {
        let long = "x".repeat(4000);
        let medium = "y".repeat(401);
        let mut messages = with_results(&[&long, &medium]);

        let c = compress(&mut messages).unwrap();
        assert_eq!(c.before, 1000 + 101);
        assert!(c.after <= c.before / 2);
        assert_eq!(function_result_tokens(&messages), c.after);

        let results = messages[2].function_results.as_ref().unwrap();
        assert!(results[0].result.ends_with("..."));
        assert_eq!(results[0].result.chars().count(), 2000);
    }

    #[test]
    fn test_repeated_compression_keeps_shrinking() {
        let mut messages = with_results(&["z".repeat(1000).as_str()]);
        let first = compress(&mut messages).unwrap();
        let second = compress(&mut messages).unwrap();
        assert!(second.before == first.after);
        assert!(second.after < second.before);
    }

    #[test]
    fn test_small_results_keep_a_cut_marker() {
        let mut messages = with_results(&["abcdefgh"]);
        let c = compress(&mut messages).unwrap();
        assert_eq!(c, Compression { before: 2, after: 1 });
        assert_eq!(messages[2].function_results.as_ref().unwrap()[0].result, "a...");
    }

    #[test]
    fn test_single_token_result_compresses_to_empty() {
        let mut messages = with_results(&["ok"]);
        let c = compress(&mut messages).unwrap();
        assert_eq!(c.after, 0);
        assert_eq!(messages[2].function_results.as_ref().unwrap()[0].result, "");
    }

    #[test]
    fn test_other_messages_untouched() {
        let mut messages = with_results(&["q".repeat(100).as_str()]);
        compress(&mut messages).unwrap();
        assert_eq!(messages[0].content, "find things");
        assert_eq!(messages[2].content, "continue");
    }
}
