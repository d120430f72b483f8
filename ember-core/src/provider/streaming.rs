//! Streaming event types and response assembly.
//!
//! This module defines the [`StreamEvent`] enum emitted while a completion
//! streams, plus the pieces that turn a sequence of events into one
//! [`CompleteResponse`]: the [`ReasoningSplicer`] that linearizes reasoning
//! and answer tokens, the [`ToolCallAccumulator`] that groups tool-call
//! fragments by index, and the [`ResponseAssembler`] that drives both.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::{InferenceError, StreamObserver};
use crate::completion::{CompleteResponse, Usage};
use crate::status::Status;
use crate::text::{THINK_CLOSE, THINK_OPEN};
use crate::tools::{self, Decoded, ToolDefinition};

/// Events emitted during a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The server accepted the request and started streaming.
    Opened,

    /// Incremental output.
    Delta {
        /// Answer text fragment.
        content: Option<String>,
        /// Reasoning text fragment.
        reasoning_content: Option<String>,
        /// Tool-call fragments.
        tool_calls: Vec<ToolCallDelta>,
    },

    /// The server reported an error inside the stream.
    Error {
        /// Error message.
        message: String,
        /// Error code, if any.
        code: Option<String>,
    },

    /// Terminal information: finish reason and/or usage totals.
    ///
    /// Servers may split these across two frames; both are merged.
    Closed {
        /// Why generation stopped.
        finish_reason: Option<String>,
        /// Authoritative token usage.
        usage: Option<Usage>,
    },
}

/// One fragment of a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Position in the in-progress tool-call list.
    pub index: u32,
    /// Name fragment.
    pub name: Option<String>,
    /// Argument text fragment.
    pub arguments: Option<String>,
}

/// A tool call assembled from its fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialToolCall {
    /// Concatenated name fragments.
    pub name: Option<String>,
    /// Concatenated argument fragments.
    pub arguments: String,
}

/// Groups tool-call fragments by index.
///
/// Fragments for one index are concatenated in arrival order; different
/// indices are independent.
#[derive(Debug, Clone, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment.
    pub fn push(&mut self, delta: &ToolCallDelta) {
        let call = self.calls.entry(delta.index).or_default();
        if let Some(name) = &delta.name {
            call.name.get_or_insert_with(String::new).push_str(name);
        }
        if let Some(arguments) = &delta.arguments {
            call.arguments.push_str(arguments);
        }
    }

    /// Whether any fragment arrived.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Assembled calls in ascending index order.
    pub fn finish(self) -> Vec<(u32, PartialToolCall)> {
        self.calls.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Segment {
    #[default]
    None,
    Content,
    Reasoning,
}

/// Wraps runs of reasoning tokens in `<think>`/`</think>`.
///
/// Each maximal run of reasoning fragments gets exactly one opening and one
/// closing delimiter, however the server chunks it.
#[derive(Debug, Clone, Default)]
pub struct ReasoningSplicer {
    segment: Segment,
}

impl ReasoningSplicer {
    /// Create a splicer in the no-token state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragments to emit for a reasoning token.
    pub fn reasoning<'a>(&mut self, text: &'a str) -> Vec<&'a str> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(2);
        if self.segment != Segment::Reasoning {
            out.push(THINK_OPEN);
            self.segment = Segment::Reasoning;
        }
        out.push(text);
        out
    }

    /// Fragments to emit for an answer token.
    pub fn content<'a>(&mut self, text: &'a str) -> Vec<&'a str> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(2);
        if self.segment == Segment::Reasoning {
            out.push(THINK_CLOSE);
        }
        self.segment = Segment::Content;
        out.push(text);
        out
    }

    /// Closing delimiter owed at stream end, if a reasoning run is open.
    pub fn finish(&mut self) -> Option<&'static str> {
        let open = self.segment == Segment::Reasoning;
        self.segment = Segment::None;
        open.then_some(THINK_CLOSE)
    }
}

/// Request-level facts the assembler cannot learn from the stream.
#[derive(Debug, Clone)]
pub struct AssemblyContext<'a> {
    /// Model name used when the stream never reports one.
    pub model: &'a str,
    /// Estimated prompt tokens, used when the stream reports no usage.
    pub estimated_prompt_tokens: u32,
    /// Whether the remote endpoint served the request.
    pub used_remote: bool,
    /// Tools offered in the request, for decoding calls.
    pub tools: &'a [ToolDefinition],
}

/// Folds stream events into a [`CompleteResponse`].
#[derive(Debug)]
pub struct ResponseAssembler {
    started: Instant,
    first_token: Option<Duration>,
    text: String,
    splicer: ReasoningSplicer,
    tool_calls: ToolCallAccumulator,
    announced_tools: bool,
    deltas: u32,
    usage: Option<Usage>,
    model: Option<String>,
    finish_reason: Option<String>,
}

impl ResponseAssembler {
    /// Start assembling an attempt that began at `started`.
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            first_token: None,
            text: String::new(),
            splicer: ReasoningSplicer::new(),
            tool_calls: ToolCallAccumulator::new(),
            announced_tools: false,
            deltas: 0,
            usage: None,
            model: None,
            finish_reason: None,
        }
    }

    /// Record the model name reported by the server.
    pub fn set_model(&mut self, model: &str) {
        if self.model.is_none() && !model.is_empty() {
            self.model = Some(model.to_string());
        }
    }

    /// Finish reason reported so far.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// In-stream error payloads are classified into an [`InferenceError`].
    pub fn apply(&mut self, event: StreamEvent, observer: &dyn StreamObserver) -> Result<(), InferenceError> {
        match event {
            StreamEvent::Opened => Ok(()),
            StreamEvent::Delta {
                content,
                reasoning_content,
                tool_calls,
            } => {
                let mut counted = false;
                if let Some(reasoning) = reasoning_content.as_deref().filter(|s| !s.is_empty()) {
                    let fragments = self.splicer.reasoning(reasoning);
                    self.emit(&fragments, observer);
                    counted = true;
                }
                if let Some(content) = content.as_deref().filter(|s| !s.is_empty()) {
                    let fragments = self.splicer.content(content);
                    self.emit(&fragments, observer);
                    counted = true;
                }
                if !tool_calls.is_empty() {
                    if !self.announced_tools {
                        self.announced_tools = true;
                        observer.on_status(Status::UsingFunctions);
                    }
                    for delta in &tool_calls {
                        self.tool_calls.push(delta);
                    }
                    counted = true;
                }
                if counted {
                    self.deltas += 1;
                }
                Ok(())
            }
            StreamEvent::Error { message, code } => {
                let status = code.as_deref().and_then(|c| c.parse::<u16>().ok());
                Err(InferenceError::classify(status, message, code))
            }
            StreamEvent::Closed {
                finish_reason,
                usage,
            } => {
                if finish_reason.is_some() {
                    self.finish_reason = finish_reason;
                }
                if usage.is_some() {
                    self.usage = usage;
                }
                Ok(())
            }
        }
    }

    fn emit(&mut self, fragments: &[&str], observer: &dyn StreamObserver) {
        if self.first_token.is_none() {
            self.first_token = Some(self.started.elapsed());
        }
        for fragment in fragments {
            observer.on_progress(fragment);
            self.text.push_str(fragment);
        }
    }

    /// Close any open reasoning run, decode tool calls and compute timing.
    pub fn finish(mut self, observer: &dyn StreamObserver, ctx: &AssemblyContext<'_>) -> CompleteResponse {
        if let Some(close) = self.splicer.finish() {
            observer.on_progress(close);
            self.text.push_str(close);
        }

        let elapsed = self.started.elapsed();
        let usage = self
            .usage
            .unwrap_or_else(|| Usage::new(ctx.estimated_prompt_tokens, self.deltas));

        let tokens_per_second = self.first_token.and_then(|ttft| {
            let generating = elapsed.saturating_sub(ttft).as_secs_f64();
            (generating > 0.0 && usage.completion_tokens > 0)
                .then(|| f64::from(usage.completion_tokens) / generating)
        });

        let mut decoded = Vec::new();
        let mut malformed = Vec::new();
        for (index, call) in self.tool_calls.finish() {
            match tools::decode(index, call.name.as_deref(), &call.arguments, ctx.tools) {
                Decoded::Call(call) => decoded.push(call),
                Decoded::Malformed(call) => {
                    tracing::debug!(index, error = %call.error, "streaming: malformed tool call");
                    malformed.push(call);
                }
            }
        }

        CompleteResponse {
            text: self.text,
            time_to_first_token: self.first_token,
            tokens_per_second,
            model: self.model.unwrap_or_else(|| ctx.model.to_string()),
            usage,
            used_remote: ctx.used_remote,
            function_calls: Vec::new(),
            tool_calls: decoded,
            malformed_tool_calls: (!malformed.is_empty()).then_some(malformed),
        }
    }
}
