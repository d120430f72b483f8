//! Client factory.
//!
//! Builds the streaming client for a resolved endpoint, wrapped in the
//! network retry decorator and wired to telemetry.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::provider::{InferenceError, OpenAiCompatClient, RetryingClient};
use crate::telemetry::TelemetrySink;

/// Create the completion client for `endpoint`.
///
/// The request timeout and attempt count come from `config.endpoint`.
///
/// # Errors
///
/// Returns [`InferenceError::InvalidRequest`] if the HTTP client cannot be
/// built.
///
/// # Examples
///
/// ```no_run
/// use ember_core::config::Config;
/// use ember_core::endpoint;
/// use ember_core::provider::create_client;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::load()?;
/// let endpoint = endpoint::resolve_with_probe(&config).await;
/// let client = create_client(&config, endpoint, None)?;
/// # Ok(())
/// # }
/// ```
pub fn create_client(
    config: &Config,
    endpoint: Endpoint,
    telemetry: Option<Arc<dyn TelemetrySink>>,
) -> Result<RetryingClient<OpenAiCompatClient>, InferenceError> {
    let timeout = Duration::from_secs(config.endpoint.request_timeout_secs.max(1));
    let mut client = OpenAiCompatClient::new(endpoint, timeout)?;
    if let Some(sink) = telemetry {
        client = client.with_telemetry(sink);
    }
    tracing::debug!(
        kind = client.endpoint().kind().as_str(),
        model = client.endpoint().model(),
        "factory: created completion client"
    );
    Ok(RetryingClient::new(client).with_max_attempts(config.endpoint.max_attempts))
}
