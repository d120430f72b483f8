//! Completion request and response types.
//!
//! A [`CompletionRequest`] is assembled once with [`CompletionRequest::builder`]
//! and is read-only afterwards. Clients answer it with a [`CompleteResponse`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::text;
use crate::tools::{DecodedToolCall, FunctionCallResult, MalformedToolCall, ToolDefinition};

/// Sampling parameters sent with a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Context length the model runs with, in tokens.
    pub context_length: u32,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            context_length: 16_384,
            max_tokens: None,
        }
    }
}

/// One chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    system_prompt: Option<String>,
    messages: Vec<Message>,
    sampling: SamplingParams,
    tools: Option<Vec<ToolDefinition>>,
    stream: bool,
}

impl CompletionRequest {
    /// Start building a request.
    pub fn builder() -> CompletionRequestBuilder {
        CompletionRequestBuilder::default()
    }

    /// System prompt, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Conversation messages in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Sampling parameters.
    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    /// Tool definitions offered to the model; `None` disables tool use.
    pub fn tools(&self) -> Option<&[ToolDefinition]> {
        self.tools.as_deref()
    }

    /// Whether the response is streamed.
    pub fn stream(&self) -> bool {
        self.stream
    }

    /// Estimated prompt size in tokens.
    pub fn estimated_prompt_tokens(&self) -> usize {
        let system = self.system_prompt.as_deref().map_or(0, text::estimate_tokens);
        system
            + self
                .messages
                .iter()
                .map(|m| text::estimate_tokens(&m.text()))
                .sum::<usize>()
    }

    /// Builder seeded with this request's contents.
    pub fn to_builder(&self) -> CompletionRequestBuilder {
        CompletionRequestBuilder {
            system_prompt: self.system_prompt.clone(),
            messages: self.messages.clone(),
            sampling: self.sampling,
            tools: self.tools.clone(),
        }
    }
}

/// Builder for [`CompletionRequest`].
#[derive(Debug, Clone, Default)]
pub struct CompletionRequestBuilder {
    system_prompt: Option<String>,
    messages: Vec<Message>,
    sampling: SamplingParams,
    tools: Option<Vec<ToolDefinition>>,
}

impl CompletionRequestBuilder {
    /// Set the system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Replace the message list.
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Append one message.
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Set sampling parameters.
    pub fn sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Offer tools to the model. An empty list disables tool use.
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }

    /// Remove any tools.
    pub fn without_tools(mut self) -> Self {
        self.tools = None;
        self
    }

    /// Finish the request.
    pub fn build(self) -> CompletionRequest {
        CompletionRequest {
            system_prompt: self.system_prompt,
            messages: self.messages,
            sampling: self.sampling,
            tools: self.tools,
            stream: true,
        }
    }
}

/// Token usage reported for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated.
    pub completion_tokens: u32,
    /// Sum of both.
    pub total_tokens: u32,
}

impl Usage {
    /// Usage with `total_tokens` computed.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Result of a completion, or of a whole agent turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompleteResponse {
    /// Full streamed text, reasoning segments included between `<think>` tags.
    pub text: String,
    /// Time until the first visible fragment.
    pub time_to_first_token: Option<Duration>,
    /// Generation speed after the first token.
    pub tokens_per_second: Option<f64>,
    /// Model that produced the response.
    pub model: String,
    /// Token usage.
    pub usage: Usage,
    /// Whether the remote endpoint served the request.
    pub used_remote: bool,
    /// Function calls executed during the turn.
    pub function_calls: Vec<FunctionCallResult>,
    /// Tool calls requested by the model, in index order.
    pub tool_calls: Vec<DecodedToolCall>,
    /// Tool calls that could not be decoded; `None` when there are none.
    pub malformed_tool_calls: Option<Vec<MalformedToolCall>>,
}

impl CompleteResponse {
    /// Plain response with the given text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Text with reasoning removed.
    pub fn answer(&self) -> String {
        text::split_reasoning(&self.text).0.trim().to_string()
    }

    /// Concatenated reasoning segments.
    pub fn reasoning(&self) -> String {
        text::split_reasoning(&self.text).1
    }

    /// Whether the model asked for any tool call, decodable or not.
    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty() || self.malformed().next().is_some()
    }

    /// Malformed tool calls, possibly none.
    pub fn malformed(&self) -> impl Iterator<Item = &MalformedToolCall> {
        self.malformed_tool_calls.iter().flatten()
    }
}
