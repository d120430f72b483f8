//! Mock completion client for testing.
//!
//! Provides [`MockClient`], a scripted implementation of
//! [`CompletionClient`] for unit and integration testing, and
//! [`RecordingObserver`], which captures stream callbacks.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CompletionClient, InferenceError, StreamObserver};
use crate::completion::{CompleteResponse, CompletionRequest};
use crate::status::Status;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A mock completion client for testing.
///
/// Replays scripted outcomes in FIFO order and records every request it
/// receives. When the script runs out, returns a default response.
///
/// # Examples
///
/// ```
/// use ember_core::completion::{CompleteResponse, CompletionRequest};
/// use ember_core::provider::{CompletionClient, InferenceError, MockClient, NoopObserver};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let client = MockClient::new()
///     .with_error(InferenceError::Network("reset".into()))
///     .with_response(CompleteResponse::from_text("Second"));
/// let request = CompletionRequest::builder().build();
/// let cancel = CancellationToken::new();
///
/// assert!(client.chat_completion(&request, &NoopObserver, &cancel).await.is_err());
/// let r = client.chat_completion(&request, &NoopObserver, &cancel).await.unwrap();
/// assert_eq!(r.text, "Second");
/// assert_eq!(client.requests().len(), 2);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockClient {
    script: Mutex<VecDeque<Result<CompleteResponse, InferenceError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockClient {
    /// Create a new mock client with an empty script.
    ///
    /// When nothing is scripted, `chat_completion()` returns
    /// a default "Mock response".
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    #[must_use]
    pub fn with_response(self, response: CompleteResponse) -> Self {
        lock(&self.script).push_back(Ok(response));
        self
    }

    /// Queue an error.
    #[must_use]
    pub fn with_error(self, error: InferenceError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl CompletionClient for MockClient {
    async fn chat_completion(
        &self,
        request: &CompletionRequest,
        observer: &dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<CompleteResponse, InferenceError> {
        lock(&self.requests).push(request.clone());

        if cancel.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }

        let next = lock(&self.script).pop_front();
        let response = match next {
            Some(outcome) => outcome?,
            None => CompleteResponse::from_text("Mock response"),
        };

        if response.requests_tools() {
            observer.on_status(Status::UsingFunctions);
        }
        if !response.text.is_empty() {
            observer.on_progress(&response.text);
        }
        Ok(response)
    }
}

/// Observer that records every callback.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    progress: Mutex<Vec<String>>,
    statuses: Mutex<Vec<Status>>,
    retries: Mutex<usize>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress fragments in arrival order.
    pub fn progress(&self) -> Vec<String> {
        lock(&self.progress).clone()
    }

    /// Progress fragments joined.
    pub fn text(&self) -> String {
        lock(&self.progress).concat()
    }

    /// Status changes in arrival order.
    pub fn statuses(&self) -> Vec<Status> {
        lock(&self.statuses).clone()
    }

    /// Number of retry notifications.
    pub fn retries(&self) -> usize {
        *lock(&self.retries)
    }
}

impl StreamObserver for RecordingObserver {
    fn on_progress(&self, fragment: &str) {
        lock(&self.progress).push(fragment.to_string());
    }

    fn on_status(&self, status: Status) {
        lock(&self.statuses).push(status);
    }

    fn on_retry(&self) {
        lock(&self.progress).clear();
        *lock(&self.retries) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Role};
    use crate::provider::NoopObserver;

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest::builder()
            .message(Message::new(Role::User, text))
            .build()
    }

    #[tokio::test]
    async fn test_mock_client_default_response() {
        let client = MockClient::new();
        let response = client
            .chat_completion(&request("Hello"), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.text, "Mock response");
    }

    #[tokio::test]
    async fn test_mock_client_fifo_order() {
        let client = MockClient::new()
            .with_response(CompleteResponse::from_text("First"))
            .with_response(CompleteResponse::from_text("Second"));
        let cancel = CancellationToken::new();

        let r1 = client.chat_completion(&request("a"), &NoopObserver, &cancel).await.unwrap();
        let r2 = client.chat_completion(&request("b"), &NoopObserver, &cancel).await.unwrap();
        assert_eq!(r1.text, "First");
        assert_eq!(r2.text, "Second");

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages()[0].content, "b");
    }

    #[tokio::test]
    async fn test_mock_client_scripted_error() {
        let client = MockClient::new().with_error(InferenceError::ContextWindowExceeded("full".into()));
        let err = client
            .chat_completion(&request("a"), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::ContextWindowExceeded(_)));
    }

    #[tokio::test]
    async fn test_mock_client_honours_cancellation() {
        let client = MockClient::new().with_response(CompleteResponse::from_text("never"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .chat_completion(&request("a"), &NoopObserver, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::Cancelled);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_client_reports_progress() {
        let client = MockClient::new().with_response(CompleteResponse::from_text("streamed"));
        let observer = RecordingObserver::new();
        client
            .chat_completion(&request("a"), &observer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(observer.text(), "streamed");
    }

    #[tokio::test]
    async fn test_completion_client_is_object_safe() {
        let client: Box<dyn CompletionClient> = Box::new(MockClient::new());
        let response = client
            .chat_completion(&request("Test"), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.text, "Mock response");
    }
}
