//! Retry wrapper for completion clients.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CompletionClient, InferenceError, StreamObserver};
use crate::completion::{CompleteResponse, CompletionRequest};

/// Retries network failures of the wrapped client.
///
/// Only [`InferenceError::is_retryable`] errors are retried; cancellation
/// and server-reported errors are returned immediately. The back-off grows
/// linearly with the attempt number and is cut short by cancellation.
/// Before each new attempt the observer gets [`StreamObserver::on_retry`]
/// so it can discard fragments streamed by the failed one.
#[derive(Debug)]
pub struct RetryingClient<C> {
    inner: C,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<C: CompletionClient> RetryingClient<C> {
    /// Wrap `inner` with 3 attempts and a 1 s base delay.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Set the total number of attempts (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the base back-off delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// The wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CompletionClient> CompletionClient for RetryingClient<C> {
    async fn chat_completion(
        &self,
        request: &CompletionRequest,
        observer: &dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<CompleteResponse, InferenceError> {
        let mut attempt = 1;
        loop {
            match self.inner.chat_completion(request, observer, cancel).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.retry_delay * attempt;
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "retry: network failure, retrying in {:?}",
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    observer.on_retry();
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(attempts = attempt, error = %e, "retry: giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::provider::mock::RecordingObserver;
    use crate::provider::{MockClient, NoopObserver};
    use crate::status::{Status, StatusTracker};

    /// Streams a fragment, then drops the connection on the first call.
    struct DropsMidStream {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionClient for DropsMidStream {
        async fn chat_completion(
            &self,
            _request: &CompletionRequest,
            observer: &dyn StreamObserver,
            _cancel: &CancellationToken,
        ) -> Result<CompleteResponse, InferenceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                observer.on_progress("half an ans");
                return Err(InferenceError::Network("connection reset".into()));
            }
            observer.on_progress("full answer");
            Ok(CompleteResponse::from_text("full answer"))
        }
    }

    fn drops_mid_stream() -> RetryingClient<DropsMidStream> {
        RetryingClient::new(DropsMidStream {
            calls: AtomicU32::new(0),
        })
        .with_retry_delay(Duration::ZERO)
    }

    fn request() -> CompletionRequest {
        CompletionRequest::builder().build()
    }

    fn network() -> InferenceError {
        InferenceError::Network("connection reset".into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_network_errors_then_succeeds() {
        let client = RetryingClient::new(
            MockClient::new()
                .with_error(network())
                .with_error(network())
                .with_response(CompleteResponse::from_text("ok")),
        );
        let response = client
            .chat_completion(&request(), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(client.inner().call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let client = RetryingClient::new(
            MockClient::new()
                .with_error(InferenceError::Network("first".into()))
                .with_error(InferenceError::Network("second".into()))
                .with_error(InferenceError::Network("third".into()))
                .with_response(CompleteResponse::from_text("too late")),
        );
        let err = client
            .chat_completion(&request(), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::Network("third".into()));
        assert_eq!(client.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_non_network_errors() {
        let client = RetryingClient::new(
            MockClient::new()
                .with_error(InferenceError::ContextWindowExceeded("full".into()))
                .with_response(CompleteResponse::from_text("unused")),
        );
        let err = client
            .chat_completion(&request(), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::ContextWindowExceeded(_)));
        assert_eq!(client.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn test_never_retries_cancelled() {
        let client = RetryingClient::new(MockClient::new().with_error(InferenceError::Cancelled));
        let err = client
            .chat_completion(&request(), &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::Cancelled);
        assert_eq!(client.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let client = RetryingClient::new(MockClient::new().with_error(network()))
            .with_retry_delay(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = client
            .chat_completion(&request(), &NoopObserver, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::Cancelled);
        assert_eq!(client.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_configuration() {
        let client = RetryingClient::new(MockClient::new().with_error(network())).with_max_attempts(0);
        assert!(client
            .chat_completion(&request(), &NoopObserver, &CancellationToken::new())
            .await
            .is_err());
        assert_eq!(client.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_discards_partial_from_failed_attempt() {
        let tracker = StatusTracker::new(Status::Ready);
        tracker.begin(Status::Querying);

        drops_mid_stream()
            .chat_completion(&request(), &tracker, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(tracker.partial(), "full answer");
        assert_eq!(tracker.status(), Status::Querying);
    }

    #[tokio::test]
    async fn test_observer_notified_once_per_retry() {
        let observer = RecordingObserver::new();
        drops_mid_stream()
            .chat_completion(&request(), &observer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(observer.retries(), 1);
        assert_eq!(observer.text(), "full answer");
    }
}
