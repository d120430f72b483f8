//! Serde request/response structs for OpenAI-compatible Chat Completions APIs.
//!
//! These types are private to the `openai_compat` module.

use serde::{Deserialize, Serialize};

use crate::completion::Usage;

/// SSE "[DONE]" marker sent by OpenAI-compatible streaming APIs.
pub(super) const SSE_DONE_MARKER: &str = "[DONE]";

/// Request body for a streaming Chat Completions call.
#[derive(Debug, Serialize)]
pub(super) struct ChatRequest {
    pub(super) model: String,
    pub(super) messages: Vec<ApiMessage>,
    pub(super) temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) max_tokens: Option<u32>,
    pub(super) stream: bool,
    pub(super) stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) tools: Option<Vec<OaiTool>>,
    /// `"auto"` when tools are offered, omitted otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) tool_choice: Option<&'static str>,
}

/// Ask the server to send a final usage frame.
#[derive(Debug, Serialize)]
pub(super) struct StreamOptions {
    pub(super) include_usage: bool,
}

/// A single message in the API request body.
#[derive(Debug, Serialize)]
pub(super) struct ApiMessage {
    /// Message role ("system", "user" or "assistant").
    pub(super) role: &'static str,
    pub(super) content: ApiContent,
}

/// Plain text, or text plus images for multimodal models.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(super) enum ApiContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One part of a multimodal message.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
pub(super) struct ImageUrl {
    pub(super) url: String,
}

/// Tool definition in OpenAI-compatible format.
#[derive(Debug, Serialize)]
pub(super) struct OaiTool {
    #[serde(rename = "type")]
    pub(super) tool_type: &'static str,
    pub(super) function: OaiFunction,
}

/// Function definition within a tool.
#[derive(Debug, Serialize)]
pub(super) struct OaiFunction {
    pub(super) name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) description: Option<String>,
    pub(super) parameters: serde_json::Value,
}

/// One SSE data payload: an error report or a chunk.
///
/// `Error` is tried first because every field of [`StreamChunk`] is optional.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum Frame {
    Error(ApiError),
    Chunk(StreamChunk),
}

/// Error response body from the API.
#[derive(Debug, Deserialize)]
pub(super) struct ApiError {
    pub(super) error: ErrorDetail,
}

/// Detail inside an API error response.
#[derive(Debug, Deserialize)]
pub(super) struct ErrorDetail {
    pub(super) message: String,
    /// String or number depending on the server.
    #[serde(default)]
    pub(super) code: Option<serde_json::Value>,
}

impl ErrorDetail {
    pub(super) fn code_string(&self) -> Option<String> {
        match &self.code {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// An SSE streaming response chunk.
#[derive(Debug, Deserialize)]
pub(super) struct StreamChunk {
    #[serde(default)]
    pub(super) model: Option<String>,
    #[serde(default)]
    pub(super) choices: Vec<StreamChoice>,
    #[serde(default)]
    pub(super) usage: Option<ApiUsage>,
}

/// A choice in a streaming response chunk.
#[derive(Debug, Deserialize)]
pub(super) struct StreamChoice {
    #[serde(default)]
    pub(super) delta: Option<StreamDelta>,
    #[serde(default)]
    pub(super) finish_reason: Option<String>,
}

/// Delta content in a streaming choice.
#[derive(Debug, Default, Deserialize)]
pub(super) struct StreamDelta {
    #[serde(default)]
    pub(super) content: Option<String>,
    #[serde(default)]
    pub(super) reasoning_content: Option<String>,
    #[serde(default)]
    pub(super) tool_calls: Vec<DeltaToolCall>,
}

/// Tool-call fragment in a delta.
#[derive(Debug, Deserialize)]
pub(super) struct DeltaToolCall {
    #[serde(default)]
    pub(super) index: u32,
    #[serde(default)]
    pub(super) function: Option<DeltaFunction>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DeltaFunction {
    #[serde(default)]
    pub(super) name: Option<String>,
    #[serde(default)]
    pub(super) arguments: Option<String>,
}

/// Usage totals.
#[derive(Debug, Deserialize)]
pub(super) struct ApiUsage {
    #[serde(default)]
    pub(super) prompt_tokens: u32,
    #[serde(default)]
    pub(super) completion_tokens: u32,
    #[serde(default)]
    pub(super) total_tokens: Option<u32>,
}

impl From<ApiUsage> for Usage {
    fn from(usage: ApiUsage) -> Self {
        let mut out = Usage::new(usage.prompt_tokens, usage.completion_tokens);
        if let Some(total) = usage.total_tokens {
            out.total_tokens = total;
        }
        out
    }
}

/// Request body for the tokenize endpoint.
#[derive(Debug, Serialize)]
pub(super) struct TokenizeRequest<'a> {
    pub(super) content: &'a str,
}

/// Response from the tokenize endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct TokenizeResponse {
    pub(super) tokens: Vec<serde_json::Value>,
}

/// Response from the models endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct ModelList {
    pub(super) data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ModelEntry {
    pub(super) id: String,
}
