//! Completion client abstraction layer.
//!
//! Defines the [`CompletionClient`] trait that every inference backend
//! implements, the [`StreamObserver`] callbacks fired while a response
//! streams, and the [`InferenceError`] taxonomy shared by the client, the
//! retry wrapper and the agent loop.

pub mod factory;
pub mod mock;
pub mod openai_compat;
pub mod retry;
pub mod streaming;

pub use factory::create_client;
pub use mock::MockClient;
pub use openai_compat::OpenAiCompatClient;
pub use retry::RetryingClient;
pub use streaming::StreamEvent;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::completion::{CompleteResponse, CompletionRequest};
use crate::status::{Status, StatusTracker};

/// Error type for inference operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// Transport failure or a 5xx response. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The prompt does not fit the model's context window.
    #[error("context window exceeded: {0}")]
    ContextWindowExceeded(String),

    /// The server reported an error.
    #[error("server error: {message}")]
    ErrorResponse {
        /// Error message from the server.
        message: String,
        /// Error code or HTTP status, when known.
        code: Option<String>,
    },

    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// A response could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The request could not be built or sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl InferenceError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceError::Network(_))
    }

    /// Classify a server-reported error by HTTP status and message.
    pub fn classify(status: Option<u16>, message: String, code: Option<String>) -> Self {
        if status == Some(413) || is_context_window_message(&message) {
            return InferenceError::ContextWindowExceeded(message);
        }
        match status {
            Some(status @ 500..=599) => InferenceError::Network(format!("HTTP {status}: {message}")),
            _ => InferenceError::ErrorResponse {
                message,
                code: code.or_else(|| status.map(|s| s.to_string())),
            },
        }
    }
}

/// Message fragments servers use to report context overflow.
const CONTEXT_WINDOW_SIGNATURES: &[&str] = &[
    "context length",
    "context window",
    "exceeds the available context",
    "too many tokens",
    "maximum context",
    "prompt is too long",
];

fn is_context_window_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONTEXT_WINDOW_SIGNATURES.iter().any(|s| lower.contains(s))
}

/// Callbacks fired while a response streams.
///
/// All methods default to no-ops.
pub trait StreamObserver: Send + Sync {
    /// A visible fragment arrived, reasoning delimiters included.
    fn on_progress(&self, _fragment: &str) {}

    /// The stream changed what the model is doing.
    fn on_status(&self, _status: Status) {}

    /// The request is about to be sent again; fragments seen so far belong
    /// to a failed attempt.
    fn on_retry(&self) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}

impl StreamObserver for StatusTracker {
    fn on_progress(&self, fragment: &str) {
        self.append_partial(fragment);
    }

    fn on_status(&self, status: Status) {
        self.set(status);
    }

    fn on_retry(&self) {
        self.clear_partial();
    }
}

/// Trait for completion clients.
///
/// Implementations must be thread-safe (`Send + Sync`) for use
/// in async contexts.
///
/// # Examples
///
/// ```
/// use ember_core::completion::{CompleteResponse, CompletionRequest};
/// use ember_core::message::{Message, Role};
/// use ember_core::provider::{CompletionClient, MockClient, NoopObserver};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let client = MockClient::new().with_response(CompleteResponse::from_text("Hi!"));
/// let request = CompletionRequest::builder()
///     .message(Message::new(Role::User, "Hello"))
///     .build();
///
/// let response = client
///     .chat_completion(&request, &NoopObserver, &CancellationToken::new())
///     .await
///     .unwrap();
/// assert_eq!(response.answer(), "Hi!");
/// # }
/// ```
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Stream a completion for `request`.
    ///
    /// Progress and status changes are reported to `observer` in stream
    /// order. Cancelling `cancel` aborts the stream; a cancelled request
    /// returns [`InferenceError::Cancelled`] and never yields tool calls.
    async fn chat_completion(
        &self,
        request: &CompletionRequest,
        observer: &dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<CompleteResponse, InferenceError>;
}
