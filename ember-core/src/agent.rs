//! Agentic loop controller.
//!
//! [`Agent`] drives one logical turn: it sends the conversation, executes the
//! tool calls the model asks for, feeds the results back as a synthetic user
//! message, and repeats until the model answers without tools.
//!
//! The loop never fails because of tool trouble. Tool errors and
//! undecodable calls become [`FunctionCallResult`]s the model can react to;
//! a run of all-malformed responses trips a circuit breaker that returns an
//! explanatory response; an exhausted iteration budget ends with one
//! tools-disabled request so the caller always gets an answer. Errors that
//! do propagate are inference failures (network, cancellation, a context
//! window that compression could not rescue).

pub mod compress;
pub mod sufficiency;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::completion::{CompleteResponse, CompletionRequest, SamplingParams, Usage};
use crate::config::{AgentConfig, Config};
use crate::message::{Message, Role};
use crate::provider::{CompletionClient, InferenceError, StreamObserver};
use crate::status::{DeepResearchGuard, Status, StatusTracker};
use crate::tools::{
    DecodedToolCall, FunctionCallResult, MalformedToolCall, TodoList, ToolContext, ToolDefinition,
    ToolRegistry,
};

/// Steering after the sufficiency check said enough was gathered.
pub const STEER_FINAL: &str = "You have gathered enough information. Organize it into a final \
response to the original request.";

/// Steering after the sufficiency check said more is needed.
pub const STEER_CONTINUE: &str = "The information gathered so far is not sufficient. Call another \
function to continue.";

/// Steering when no sufficiency check runs.
pub const STEER_NEUTRAL: &str = "Call another function if you still need information; otherwise \
answer the original request.";

/// Error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A completion request failed and could not be recovered.
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
}

impl AgentError {
    /// Whether the turn was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Inference(InferenceError::Cancelled))
    }
}

/// How much tool use a turn may involve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AgentMode {
    /// Plain chat: no tools are offered.
    #[default]
    Chat,
    /// Tools are offered.
    Tools,
    /// Tools are offered, status is held in deep research, and the
    /// sufficiency check always runs.
    DeepResearch,
}

/// Drives completion requests and tool execution for one conversation.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use ember_core::agent::{Agent, AgentMode};
/// use ember_core::completion::CompleteResponse;
/// use ember_core::message::{Message, Role};
/// use ember_core::provider::{MockClient, NoopObserver};
/// use ember_core::tools::ToolRegistry;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let client = Arc::new(MockClient::new().with_response(CompleteResponse::from_text("Hello!")));
/// let agent = Agent::new(client, ToolRegistry::new()).with_system_prompt("Be brief.");
///
/// let response = agent
///     .run(
///         vec![Message::new(Role::User, "Hi")],
///         AgentMode::Chat,
///         &NoopObserver,
///         &CancellationToken::new(),
///     )
///     .await
///     .unwrap();
/// assert_eq!(response.answer(), "Hello!");
/// # }
/// ```
pub struct Agent {
    client: Arc<dyn CompletionClient>,
    sufficiency_client: Option<Arc<dyn CompletionClient>>,
    registry: ToolRegistry,
    config: AgentConfig,
    sampling: SamplingParams,
    system_prompt: Option<String>,
    status: Option<StatusTracker>,
    todos: TodoList,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("sampling", &self.sampling)
            .field("system_prompt", &self.system_prompt)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create an agent with default loop settings.
    pub fn new(client: Arc<dyn CompletionClient>, registry: ToolRegistry) -> Self {
        let config = AgentConfig::default();
        Self {
            client,
            sufficiency_client: None,
            registry,
            sampling: SamplingParams {
                temperature: config.temperature,
                ..SamplingParams::default()
            },
            config,
            system_prompt: None,
            status: None,
            todos: TodoList::new(),
        }
    }

    /// Create an agent from application configuration.
    ///
    /// Takes the loop settings, system prompt and context length from
    /// `config`.
    pub fn from_config(
        config: &Config,
        client: Arc<dyn CompletionClient>,
        registry: ToolRegistry,
    ) -> Self {
        let mut agent = Self::new(client, registry).with_config(config.agent.clone());
        agent.sampling.context_length = config.server.context_length;
        match &config.system_prompt {
            Some(prompt) => agent.with_system_prompt(prompt),
            None => agent,
        }
    }

    /// Replace the loop settings.
    #[must_use]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.sampling.temperature = config.temperature;
        self.config = config;
        self
    }

    /// Use a separate, usually cheaper, client for sufficiency checks.
    #[must_use]
    pub fn with_sufficiency_client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.sufficiency_client = Some(client);
        self
    }

    /// Publish status changes to `tracker`.
    #[must_use]
    pub fn with_status(mut self, tracker: StatusTracker) -> Self {
        self.status = Some(tracker);
        self
    }

    /// Set the system prompt sent with every request.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// To-do items registered by tools during the current turn.
    pub fn todos(&self) -> &TodoList {
        &self.todos
    }

    /// Run one turn over `messages`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Inference`] when a request fails beyond
    /// recovery, including [`InferenceError::Cancelled`] after `cancel`
    /// fires. Once cancelled, no further tool call is executed.
    pub async fn run(
        &self,
        messages: Vec<Message>,
        mode: AgentMode,
        observer: &dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<CompleteResponse, AgentError> {
        let tools = match mode {
            AgentMode::Chat => Vec::new(),
            AgentMode::Tools | AgentMode::DeepResearch => self.registry.definitions(),
        };
        let check_sufficiency = mode == AgentMode::DeepResearch || self.config.sufficiency_check;
        let status = StatusScope::enter(self.status.as_ref(), mode);
        self.todos.clear();

        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text)
            .unwrap_or_default();

        let mut turn = Turn {
            history: messages,
            results: Vec::new(),
            usage: Usage::default(),
            compressions_left: if self.config.compression {
                self.config.compression_attempts
            } else {
                0
            },
        };
        let mut remaining = self.config.max_iterations;
        let mut malformed_streak = 0;

        let mut response = self.request(&mut turn, &tools, observer, cancel).await?;
        loop {
            if !response.requests_tools() {
                tracing::debug!(calls = turn.results.len(), "agent: final response");
                return Ok(turn.finish(response));
            }

            if remaining == 0 {
                tracing::warn!(
                    max_iterations = self.config.max_iterations,
                    "agent: iteration budget exhausted, answering without tools"
                );
                turn.history.push(assistant_message(&response));
                turn.history.push(Message::new(
                    Role::User,
                    "Stop calling functions. Answer the original request with the information \
                     gathered so far.",
                ));
                let fallback = self.request(&mut turn, &[], observer, cancel).await?;
                return Ok(turn.finish(fallback));
            }

            let malformed: Vec<MalformedToolCall> = response.malformed().cloned().collect();
            let mut batch = Vec::new();

            if response.tool_calls.is_empty() {
                malformed_streak += 1;
                tracing::warn!(
                    streak = malformed_streak,
                    calls = malformed.len(),
                    "agent: every tool call was malformed"
                );
                batch.extend(malformed.iter().map(|call| (call.index, malformed_feedback(call))));
                if malformed_streak >= self.config.malformed_threshold {
                    turn.results.extend(batch.into_iter().map(|(_, result)| result));
                    let breaker = circuit_breaker(&response, &malformed, malformed_streak);
                    return Ok(turn.finish(breaker));
                }
            } else {
                malformed_streak = 0;
                status.set(Status::UsingFunctions);
                for call in &response.tool_calls {
                    if cancel.is_cancelled() {
                        return Err(InferenceError::Cancelled.into());
                    }
                    batch.push((call.index, self.execute(call).await));
                }
                batch.extend(malformed.iter().map(|call| (call.index, malformed_feedback(call))));
            }
            batch.sort_by_key(|(index, _)| *index);
            let batch: Vec<FunctionCallResult> = batch.into_iter().map(|(_, result)| result).collect();

            let steering = if check_sufficiency {
                let mut gathered = turn.results.clone();
                gathered.extend(batch.iter().cloned());
                let client = self.sufficiency_client.as_deref().unwrap_or(self.client.as_ref());
                if sufficiency::is_sufficient(client, &question, &gathered, &self.todos, cancel).await {
                    STEER_FINAL
                } else {
                    STEER_CONTINUE
                }
            } else {
                STEER_NEUTRAL
            };

            turn.history.push(assistant_message(&response));
            turn.history.push(Message::function_results(batch.clone(), steering));
            turn.results.extend(batch);

            status.set(Status::Querying);
            remaining -= 1;
            response = self.request(&mut turn, &tools, observer, cancel).await?;
        }
    }

    /// Send the current history, compressing function results when the
    /// context window overflows. Compressions draw on the turn's budget.
    async fn request(
        &self,
        turn: &mut Turn,
        tools: &[ToolDefinition],
        observer: &dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<CompleteResponse, AgentError> {
        loop {
            if cancel.is_cancelled() {
                return Err(InferenceError::Cancelled.into());
            }
            let request = self.build_request(&turn.history, tools);
            match self.client.chat_completion(&request, observer, cancel).await {
                Ok(response) => {
                    turn.usage = add_usage(turn.usage, response.usage);
                    return Ok(response);
                }
                Err(InferenceError::ContextWindowExceeded(message)) if turn.compressions_left > 0 => {
                    turn.compressions_left -= 1;
                    match compress::compress(&mut turn.history) {
                        Some(c) => tracing::warn!(
                            before = c.before,
                            after = c.after,
                            "agent: context window exceeded, retrying with compressed results"
                        ),
                        None => return Err(InferenceError::ContextWindowExceeded(message).into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn build_request(&self, history: &[Message], tools: &[ToolDefinition]) -> CompletionRequest {
        let mut builder = CompletionRequest::builder()
            .messages(history.to_vec())
            .sampling(self.sampling)
            .tools(tools.to_vec());
        if let Some(prompt) = &self.system_prompt {
            builder = builder.system_prompt(prompt);
        }
        builder.build()
    }

    async fn execute(&self, call: &DecodedToolCall) -> FunctionCallResult {
        let signature = call.signature();
        tracing::debug!(tool = %call.name, index = call.index, "agent: executing tool");
        let ctx = ToolContext { todos: &self.todos };
        let arguments = serde_json::Value::Object(call.arguments.clone());
        match self.registry.invoke(&call.name, arguments, &ctx).await {
            Ok(output) => FunctionCallResult::success(signature, output),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "agent: tool failed");
                FunctionCallResult::error(signature, e.to_string())
            }
        }
    }
}

/// Conversation and bookkeeping for one turn.
struct Turn {
    history: Vec<Message>,
    results: Vec<FunctionCallResult>,
    usage: Usage,
    compressions_left: u32,
}

impl Turn {
    fn finish(self, mut response: CompleteResponse) -> CompleteResponse {
        response.function_calls = self.results;
        response.usage = self.usage;
        response
    }
}

/// Status ownership for the duration of a turn.
enum StatusScope {
    Untracked,
    Tracked(StatusTracker),
    Deep(DeepResearchGuard),
}

impl StatusScope {
    fn enter(tracker: Option<&StatusTracker>, mode: AgentMode) -> Self {
        match (tracker, mode) {
            (None, _) => StatusScope::Untracked,
            (Some(tracker), AgentMode::DeepResearch) => {
                StatusScope::Deep(tracker.enter_deep_research())
            }
            // Refused while another turn holds deep research; leave it alone.
            (Some(tracker), _) if tracker.begin(Status::Querying) => {
                StatusScope::Tracked(tracker.clone())
            }
            (Some(_), _) => StatusScope::Untracked,
        }
    }

    fn set(&self, status: Status) {
        match self {
            StatusScope::Untracked => {}
            StatusScope::Tracked(tracker) => {
                tracker.set(status);
            }
            // Deep research keeps its label for the whole turn.
            StatusScope::Deep(_) => {}
        }
    }
}

impl Drop for StatusScope {
    fn drop(&mut self) {
        if let StatusScope::Tracked(tracker) = self {
            tracker.reset();
        }
    }
}

fn add_usage(total: Usage, more: Usage) -> Usage {
    Usage {
        prompt_tokens: total.prompt_tokens.saturating_add(more.prompt_tokens),
        completion_tokens: total.completion_tokens.saturating_add(more.completion_tokens),
        total_tokens: total.total_tokens.saturating_add(more.total_tokens),
    }
}

/// The model's tool-calling response as it goes back into the history.
fn assistant_message(response: &CompleteResponse) -> Message {
    let mut content = response.answer();
    let calls = response
        .tool_calls
        .iter()
        .map(DecodedToolCall::signature)
        .chain(response.malformed().map(MalformedToolCall::signature));
    for call in calls {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str("Function call: ");
        content.push_str(&call);
    }
    Message::new(Role::Assistant, content)
}

fn malformed_feedback(call: &MalformedToolCall) -> FunctionCallResult {
    FunctionCallResult::error(
        call.signature(),
        format!(
            "the call could not be decoded ({}). Call the function again with JSON arguments \
             that match its parameters.",
            call.error
        ),
    )
}

fn circuit_breaker(
    last: &CompleteResponse,
    malformed: &[MalformedToolCall],
    streak: u32,
) -> CompleteResponse {
    let mut text = format!(
        "I stopped after {streak} consecutive responses in which every function call was \
         malformed, so no function could be run. The last attempts failed with:\n"
    );
    for call in malformed {
        text.push_str(&format!("- {}: {}\n", call.signature(), call.error));
    }
    text.push_str("Try rephrasing the request or switching to a model with better tool support.");

    CompleteResponse {
        text,
        model: last.model.clone(),
        used_remote: last.used_remote,
        ..CompleteResponse::default()
    }
}
