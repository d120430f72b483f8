//! Yes/no check on whether a tool-using turn has gathered enough.

use tokio_util::sync::CancellationToken;

use crate::completion::{CompletionRequest, SamplingParams};
use crate::message::{Message, Role};
use crate::provider::{CompletionClient, NoopObserver};
use crate::tools::{FunctionCallResult, TodoList};

/// Attempts before an unclear answer counts as "insufficient".
pub const SUFFICIENCY_ATTEMPTS: u32 = 3;

const SYSTEM_PROMPT: &str = "You judge whether an assistant has finished researching a request. \
Reply with exactly one word: YES or NO.";

/// Ask `client` whether `results` answer `question`.
///
/// Returns `false` without asking while any to-do item is open, when the
/// client fails, and when no attempt produces a plain `YES` or `NO`.
pub async fn is_sufficient(
    client: &dyn CompletionClient,
    question: &str,
    results: &[FunctionCallResult],
    todos: &TodoList,
    cancel: &CancellationToken,
) -> bool {
    if todos.has_incomplete() {
        tracing::debug!("sufficiency: open to-do items, continuing");
        return false;
    }

    let request = CompletionRequest::builder()
        .system_prompt(SYSTEM_PROMPT)
        .message(Message::new(Role::User, prompt(question, results)))
        .sampling(SamplingParams {
            temperature: 0.0,
            max_tokens: Some(512),
            ..SamplingParams::default()
        })
        .build();

    for attempt in 1..=SUFFICIENCY_ATTEMPTS {
        let response = match client.chat_completion(&request, &NoopObserver, cancel).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "sufficiency: check failed");
                return false;
            }
        };
        match parse_verdict(&response.answer()) {
            Some(verdict) => {
                tracing::debug!(attempt, verdict, "sufficiency: answered");
                return verdict;
            }
            None => tracing::debug!(attempt, "sufficiency: unclear answer"),
        }
    }
    false
}

fn parse_verdict(answer: &str) -> Option<bool> {
    let answer = answer.trim();
    if answer.eq_ignore_ascii_case("yes") {
        Some(true)
    } else if answer.eq_ignore_ascii_case("no") {
        Some(false)
    } else {
        None
    }
}

fn prompt(question: &str, results: &[FunctionCallResult]) -> String {
    let mut out = format!("Original request:\n{question}\n\nFunction calls so far:\n\n");
    for result in results {
        out.push_str(&result.render());
        out.push_str("\n\n");
    }
    out.push_str(
        "Have these function calls gathered enough information, used enough function calls, \
         and completed the original plan? Answer YES or NO.",
    );
    out
}
