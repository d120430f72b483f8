//! Tool registry.
//!
//! A tool is a named, schema-described, asynchronous and possibly failing
//! operation. The registry is resolved once at construction and maps tool
//! names to boxed [`Tool`] implementations. Decoding of model-issued calls
//! against the offered tool definitions lives in [`decode`].

pub mod decode;
pub mod schema;
pub mod todo;

pub use decode::{Decoded, DecodedToolCall, MalformedToolCall, Recovery, decode};
pub use todo::{TodoItem, TodoList, TodoTool};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool definition in provider-agnostic format.
///
/// Serialized for OpenAI-compatible endpoints as
/// `{ type: "function", function: { name, description, parameters } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Optional description of the tool.
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: serde_json::Value,
}

/// How much trust a tool needs before it may run unattended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Clearance {
    /// Read-only or otherwise harmless.
    #[default]
    Default,
    /// Changes state the user may care about.
    Sensitive,
    /// Destructive or irreversible.
    Dangerous,
}

/// Errors raised by tool lookup and execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The arguments do not satisfy the tool's schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Execution(String),
}

/// Per-turn state handed to every tool invocation.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    /// To-do items registered by tools during this turn.
    pub todos: &'a TodoList,
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and parameter schema.
    fn definition(&self) -> &ToolDefinition;

    /// Clearance level required to run the tool.
    fn clearance(&self) -> Clearance {
        Clearance::Default
    }

    /// Run the tool with already-validated arguments.
    async fn run(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<String, ToolError>;
}

/// Tools available to the agent, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name.clone();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tools: replaced previously registered tool");
        }
    }

    /// Builder-style [`register`](ToolRegistry::register).
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Registered tool names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Definitions of every registered tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition().clone()).collect()
    }

    /// Check if any tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] if no such tool is registered, or
    /// whatever the tool itself fails with.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.run(arguments, ctx).await
    }
}

/// Whether a function call produced a result or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionCallKind {
    /// The call succeeded.
    Result,
    /// The call failed or could not be decoded.
    Error,
}

/// Outcome of one function call, shown to the user and fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResult {
    /// Textual call signature, e.g. `get_weather(city: "Oslo")`.
    pub call: String,
    /// Result text, or the error description.
    pub result: String,
    /// Result or error.
    pub kind: FunctionCallKind,
}

impl FunctionCallResult {
    /// Successful call.
    pub fn success(call: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            call: call.into(),
            result: result.into(),
            kind: FunctionCallKind::Result,
        }
    }

    /// Failed call.
    pub fn error(call: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call: call.into(),
            result: error.into(),
            kind: FunctionCallKind::Error,
        }
    }

    /// Render as the text block sent back to the model.
    pub fn render(&self) -> String {
        let label = match self.kind {
            FunctionCallKind::Result => "Result",
            FunctionCallKind::Error => "Error",
        };
        format!("Function call: {}\n{}: {}", self.call, label, self.result)
    }
}

/// Format a call signature as `name(key: value, ...)`.
pub fn format_call(name: &str, arguments: &serde_json::Map<String, serde_json::Value>) -> String {
    let args: Vec<String> = arguments
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect();
    format!("{}({})", name, args.join(", "))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A tool that echoes a fixed reply or fails, for registry and loop tests.
    pub(crate) struct StaticTool {
        definition: ToolDefinition,
        reply: Result<String, String>,
    }

    impl StaticTool {
        pub(crate) fn ok(name: &str, schema: serde_json::Value, reply: &str) -> Arc<dyn Tool> {
            Arc::new(Self {
                definition: ToolDefinition {
                    name: name.to_string(),
                    description: None,
                    input_schema: schema,
                },
                reply: Ok(reply.to_string()),
            })
        }

        pub(crate) fn failing(name: &str, schema: serde_json::Value, error: &str) -> Arc<dyn Tool> {
            Arc::new(Self {
                definition: ToolDefinition {
                    name: name.to_string(),
                    description: None,
                    input_schema: schema,
                },
                reply: Err(error.to_string()),
            })
        }
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        async fn run(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolContext<'_>,
        ) -> Result<String, ToolError> {
            self.reply.clone().map_err(ToolError::Execution)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StaticTool;
    use super::*;

    #[test]
    fn test_registry_definitions_sorted_by_name() {
        let registry = ToolRegistry::new()
            .with_tool(StaticTool::ok("b_tool", serde_json::json!({}), "b"))
            .with_tool(StaticTool::ok("a_tool", serde_json::json!({}), "a"));

        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["a_tool", "b_tool"]);
        assert_eq!(registry.definitions()[0].name, "a_tool");
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let todos = TodoList::new();
        let ctx = ToolContext { todos: &todos };
        let result = registry.invoke("missing", serde_json::json!({}), &ctx).await;
        assert!(matches!(result, Err(ToolError::UnknownTool(name)) if name == "missing"));
    }

    #[tokio::test]
    async fn test_invoke_routes_to_tool() {
        let registry =
            ToolRegistry::new().with_tool(StaticTool::ok("echo", serde_json::json!({}), "pong"));
        let todos = TodoList::new();
        let ctx = ToolContext { todos: &todos };
        let result = registry.invoke("echo", serde_json::json!({}), &ctx).await;
        assert_eq!(result.unwrap(), "pong");
    }

    #[test]
    fn test_format_call() {
        let args = serde_json::json!({"city": "Oslo", "days": 3});
        let call = format_call("forecast", args.as_object().unwrap());
        assert_eq!(call, "forecast(city: \"Oslo\", days: 3)");
    }

    #[test]
    fn test_render_error_result() {
        let result = FunctionCallResult::error("f()", "boom");
        assert_eq!(result.render(), "Function call: f()\nError: boom");
        assert_eq!(result.kind, FunctionCallKind::Error);
    }
}
