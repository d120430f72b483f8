//! Streaming client for OpenAI-compatible Chat Completions APIs.
//!
//! [`OpenAiCompatClient`] talks to llama.cpp style local servers and to
//! remote OpenAI-compatible endpoints alike. Requests always stream: the SSE
//! body is decoded with `eventsource-stream`, folded into a
//! [`CompleteResponse`] by the [`ResponseAssembler`], and recorded to
//! telemetry on success.

mod types;

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use self::types::{
    ApiContent, ApiError, ApiMessage, ChatRequest, ContentPart, Frame, ImageUrl, ModelList, OaiFunction, OaiTool,
    SSE_DONE_MARKER, StreamChunk, StreamOptions, TokenizeRequest, TokenizeResponse,
};
use super::streaming::{AssemblyContext, ResponseAssembler, StreamEvent, ToolCallDelta};
use super::{CompletionClient, InferenceError, StreamObserver};
use crate::completion::{CompleteResponse, CompletionRequest};
use crate::endpoint::Endpoint;
use crate::message::Message;
use crate::telemetry::{InferenceRecord, TelemetrySink};
use crate::tools::ToolDefinition;

/// Timeout for token counting and model listing.
const AUX_TIMEOUT: Duration = Duration::from_secs(5);

/// Default streaming request timeout; reasoning models may run long.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3600);

/// What the SSE reader hands back to the completion loop.
#[derive(Debug)]
enum Item {
    /// A decoded event.
    Event(StreamEvent),
    /// Model name reported by the server.
    Model(String),
    /// A frame that could not be decoded.
    Skipped(String),
}

type ItemStream = Pin<Box<dyn Stream<Item = Result<Item, InferenceError>> + Send>>;

/// Client for one OpenAI-compatible endpoint.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    endpoint: Endpoint,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl std::fmt::Debug for OpenAiCompatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatClient")
            .field("endpoint", &self.endpoint.chat_completions_url())
            .field("telemetry", &self.telemetry.is_some())
            .finish()
    }
}

impl OpenAiCompatClient {
    /// Create a client for `endpoint` with the given streaming timeout.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::InvalidRequest`] if the HTTP client cannot
    /// be built.
    pub fn new(endpoint: Endpoint, request_timeout: Duration) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| InferenceError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            telemetry: None,
        })
    }

    /// Record one [`InferenceRecord`] per successful completion.
    #[must_use]
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Endpoint this client talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Count tokens in `text` with the server's tokenizer.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Network`] on transport failure and
    /// [`InferenceError::Decode`] on an unexpected body.
    pub async fn count_tokens(&self, text: &str) -> Result<usize, InferenceError> {
        let url = self.endpoint.tokenize_url();
        tracing::debug!(endpoint = %url, "openai_compat: POST tokenize");
        let response = self
            .authorized(self.client.post(&url))
            .timeout(AUX_TIMEOUT)
            .json(&TokenizeRequest { content: text })
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        let body: TokenizeResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;
        Ok(body.tokens.len())
    }

    /// List model ids served by the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Network`] on transport failure and
    /// [`InferenceError::Decode`] on an unexpected body.
    pub async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let url = self.endpoint.models_url();
        tracing::debug!(endpoint = %url, "openai_compat: GET models");
        let response = self
            .authorized(self.client.get(&url))
            .timeout(AUX_TIMEOUT)
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        let body: ModelList = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;
        Ok(body.data.into_iter().map(|m| m.id).collect())
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.endpoint.api_key() {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn open_stream(&self, body: ChatRequest) -> ItemStream {
        let url = self.endpoint.chat_completions_url();
        let request = self
            .authorized(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&body);
        stream_sse(url, request)
    }

    async fn record_telemetry(&self, record: InferenceRecord) {
        if let Some(sink) = &self.telemetry
            && let Err(e) = sink.record(&record).await
        {
            tracing::warn!(error = %e, "openai_compat: failed to record telemetry");
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn chat_completion(
        &self,
        request: &CompletionRequest,
        observer: &dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<CompleteResponse, InferenceError> {
        if cancel.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }

        let started = Instant::now();
        let start_time = chrono::Utc::now();
        let body = build_request(self.endpoint.model(), request);
        let mut events = self.open_stream(body);
        let mut assembler = ResponseAssembler::new(started);

        let outcome: Result<(), InferenceError> = async {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = events.next() => next,
                };
                match next {
                    Some(Ok(Item::Event(event))) => assembler.apply(event, observer)?,
                    Some(Ok(Item::Model(model))) => assembler.set_model(&model),
                    Some(Ok(Item::Skipped(reason))) => {
                        let e = InferenceError::Decode(reason);
                        tracing::warn!(error = %e, "openai_compat: skipping frame");
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                }
            }
            Ok(())
        }
        .await;
        drop(events);

        if cancel.is_cancelled() {
            tracing::debug!("openai_compat: request cancelled");
            return Err(InferenceError::Cancelled);
        }
        outcome?;

        let ctx = AssemblyContext {
            model: self.endpoint.model(),
            estimated_prompt_tokens: u32::try_from(request.estimated_prompt_tokens()).unwrap_or(u32::MAX),
            used_remote: self.endpoint.is_remote(),
            tools: request.tools().unwrap_or_default(),
        };
        let response = assembler.finish(observer, &ctx);

        tracing::debug!(
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            tool_calls = response.tool_calls.len(),
            "openai_compat: completion finished"
        );

        let mut record = InferenceRecord::new(response.model.clone(), start_time, self.endpoint.kind());
        record.input_tokens = response.usage.prompt_tokens;
        record.output_tokens = response.usage.completion_tokens;
        record.tokens_per_second = response.tokens_per_second;
        self.record_telemetry(record).await;

        Ok(response)
    }
}

/// Build the wire request.
fn build_request(model: &str, request: &CompletionRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages().len() + 1);
    if let Some(system) = request.system_prompt().filter(|s| !s.is_empty()) {
        messages.push(ApiMessage {
            role: "system",
            content: ApiContent::Text(system.to_string()),
        });
    }
    messages.extend(request.messages().iter().map(to_api_message));

    let tools = request.tools().map(to_oai_tools);
    let sampling = request.sampling();
    ChatRequest {
        model: model.to_string(),
        messages,
        temperature: sampling.temperature,
        max_tokens: sampling.max_tokens,
        stream: request.stream(),
        stream_options: StreamOptions { include_usage: true },
        tool_choice: tools.as_ref().map(|_| "auto"),
        tools,
    }
}

fn to_api_message(message: &Message) -> ApiMessage {
    let text = message.text();
    let images: Vec<_> = message.images().collect();
    let content = if images.is_empty() {
        ApiContent::Text(text)
    } else {
        let mut parts = vec![ContentPart::Text { text }];
        parts.extend(images.into_iter().map(|(media_type, data)| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{media_type};base64,{data}"),
            },
        }));
        ApiContent::Parts(parts)
    };
    ApiMessage {
        role: message.role.as_str(),
        content,
    }
}

fn to_oai_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            tool_type: "function",
            function: OaiFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Turn an error status into a classified [`InferenceError`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    let (message, code) = match serde_json::from_str::<ApiError>(&text) {
        Ok(body) => {
            let code = body.error.code_string();
            (body.error.message, code)
        }
        Err(_) => (text, None),
    };
    tracing::debug!(status = status.as_u16(), %message, "openai_compat: error response");
    Err(InferenceError::classify(Some(status.as_u16()), message, code))
}

/// Convert one decoded chunk into stream events.
fn chunk_events(chunk: StreamChunk) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let mut finish_reason = None;

    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(delta) = choice.delta {
            let tool_calls: Vec<ToolCallDelta> = delta
                .tool_calls
                .into_iter()
                .map(|tc| {
                    let (name, arguments) = tc.function.map(|f| (f.name, f.arguments)).unwrap_or_default();
                    ToolCallDelta {
                        index: tc.index,
                        name,
                        arguments,
                    }
                })
                .collect();
            if delta.content.is_some() || delta.reasoning_content.is_some() || !tool_calls.is_empty() {
                events.push(StreamEvent::Delta {
                    content: delta.content,
                    reasoning_content: delta.reasoning_content,
                    tool_calls,
                });
            }
        }
        finish_reason = choice.finish_reason;
    }

    let usage = chunk.usage.map(Into::into);
    if finish_reason.is_some() || usage.is_some() {
        events.push(StreamEvent::Closed { finish_reason, usage });
    }
    events
}

/// Send the request and stream SSE items.
///
/// Returns a pinned, owned stream. Yields [`StreamEvent::Opened`] once the
/// server accepts the request and ends at `[DONE]` or when the connection
/// closes.
fn stream_sse(endpoint: String, request: reqwest::RequestBuilder) -> ItemStream {
    Box::pin(async_stream::stream! {
        tracing::debug!(endpoint, "openai_compat: POST streaming request");
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                yield Err(InferenceError::Network(e.to_string()));
                return;
            }
        };

        let response = match check_status(response).await {
            Ok(r) => r,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        tracing::debug!(endpoint, "openai_compat: SSE stream started");
        yield Ok(Item::Event(StreamEvent::Opened));
        let mut sse_stream = response.bytes_stream().eventsource();
        let mut model_seen = false;

        while let Some(event) = sse_stream.next().await {
            match event {
                Ok(event) => {
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == SSE_DONE_MARKER {
                        tracing::debug!(endpoint, "openai_compat: SSE stream ended");
                        return;
                    }

                    match serde_json::from_str::<Frame>(data) {
                        Ok(Frame::Error(body)) => {
                            let code = body.error.code_string();
                            yield Ok(Item::Event(StreamEvent::Error { message: body.error.message, code }));
                        }
                        Ok(Frame::Chunk(mut chunk)) => {
                            if !model_seen && let Some(model) = chunk.model.take() {
                                model_seen = true;
                                yield Ok(Item::Model(model));
                            }
                            for event in chunk_events(chunk) {
                                yield Ok(Item::Event(event));
                            }
                        }
                        Err(e) => {
                            yield Ok(Item::Skipped(format!("{e}: {data}")));
                        }
                    }
                }
                Err(e) => {
                    yield Err(InferenceError::Network(e.to_string()));
                    return;
                }
            }
        }

        // Connection closed without [DONE]; the caller finalizes anyway.
        tracing::debug!(endpoint, "openai_compat: SSE connection closed");
    })
}
