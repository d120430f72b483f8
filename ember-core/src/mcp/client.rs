//! MCP client and MCP-backed tools.
//!
//! [`McpClient`] spawns every configured server over stdio, lists its tools,
//! and hands them to the agent as ordinary registry [`Tool`]s.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::ServiceExt;
use rmcp::model::CallToolRequestParams;
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;

use super::McpError;
use super::protocol::{McpConfig, McpServerConfig};
use crate::tools::{Tool, ToolContext, ToolDefinition, ToolError};

type Service = Arc<RunningService<RoleClient, ()>>;

/// Connections to MCP servers and the tools they expose.
pub struct McpClient {
    /// Connected servers, keyed by server name.
    servers: HashMap<String, Service>,
    /// Tool name -> server name.
    routes: HashMap<String, String>,
    definitions: Vec<ToolDefinition>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("servers", &self.servers.keys().collect::<Vec<_>>())
            .field("tools", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl McpClient {
    /// Connect to every configured server and discover its tools.
    ///
    /// A server that fails to start is logged and skipped.
    pub async fn connect(config: &McpConfig) -> Self {
        let mut client = Self::empty();

        for (name, server_config) in &config.mcp_servers {
            match connect_server(name, server_config).await {
                Ok((service, tools)) => {
                    tracing::info!(server = %name, tools = tools.len(), "mcp: connected");
                    for tool in &tools {
                        if let Some(previous) = client.routes.insert(tool.name.clone(), name.clone()) {
                            tracing::warn!(
                                tool = %tool.name,
                                previous = %previous,
                                server = %name,
                                "mcp: tool name exported by two servers"
                            );
                        }
                    }
                    client.definitions.extend(tools);
                    client.servers.insert(name.clone(), Arc::new(service));
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "mcp: server failed to start");
                }
            }
        }

        client
    }

    /// A client with no servers.
    pub fn empty() -> Self {
        Self {
            servers: HashMap::new(),
            routes: HashMap::new(),
            definitions: Vec::new(),
        }
    }

    /// All discovered tool definitions.
    pub fn tool_definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Check if any tools are available.
    pub fn has_tools(&self) -> bool {
        !self.definitions.is_empty()
    }

    /// Execute a tool on the server that exported it.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ToolError`] if the tool is unknown, its server is
    /// gone, or the call fails.
    pub async fn call_tool(&self, name: &str, input: serde_json::Value) -> Result<String, McpError> {
        let service = self.service_for(name)?;
        call(service, name, input).await
    }

    /// Registry tools backed by the connected servers.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.definitions
            .iter()
            .filter_map(|definition| {
                let service = self.service_for(&definition.name).ok()?;
                Some(Arc::new(McpTool {
                    definition: definition.clone(),
                    service: Arc::clone(service),
                }) as Arc<dyn Tool>)
            })
            .collect()
    }

    /// Shut down every server connection.
    ///
    /// Connections still held by tools from [`tools`](McpClient::tools) close
    /// when the last tool is dropped.
    pub async fn shutdown(self) {
        for (name, service) in self.servers {
            if let Ok(service) = Arc::try_unwrap(service)
                && let Err(e) = service.cancel().await
            {
                tracing::debug!(server = %name, error = %e, "mcp: shutdown failed");
            }
        }
    }

    fn service_for(&self, tool: &str) -> Result<&Service, McpError> {
        let server = self
            .routes
            .get(tool)
            .ok_or_else(|| McpError::ToolError(format!("unknown tool: {tool}")))?;
        self.servers
            .get(server)
            .ok_or_else(|| McpError::ToolError(format!("server '{server}' not connected")))
    }

    #[cfg(test)]
    pub(crate) fn with_test_tools(tools: Vec<ToolDefinition>) -> Self {
        let mut client = Self::empty();
        for tool in &tools {
            client.routes.insert(tool.name.clone(), "test-server".to_string());
        }
        client.definitions = tools;
        client
    }
}

/// One tool exported by an MCP server.
struct McpTool {
    definition: ToolDefinition,
    service: Service,
}

#[async_trait]
impl Tool for McpTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn run(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext<'_>,
    ) -> Result<String, ToolError> {
        call(&self.service, &self.definition.name, arguments)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))
    }
}

async fn connect_server(
    name: &str,
    config: &McpServerConfig,
) -> Result<(RunningService<RoleClient, ()>, Vec<ToolDefinition>), McpError> {
    let mut cmd = tokio::process::Command::new(&config.command);
    cmd.args(&config.args);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    let (transport, _stderr) = TokioChildProcess::builder(cmd)
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| McpError::ConnectionError {
            server: name.to_string(),
            message: format!("failed to spawn process: {e}"),
        })?;

    let service = ().serve(transport).await.map_err(|e| McpError::ConnectionError {
        server: name.to_string(),
        message: format!("failed to connect: {e}"),
    })?;

    let listed = service
        .list_tools(None)
        .await
        .map_err(|e| McpError::ConnectionError {
            server: name.to_string(),
            message: format!("failed to list tools: {e}"),
        })?;

    let tools = listed
        .tools
        .into_iter()
        .map(|t| ToolDefinition {
            name: t.name.to_string(),
            description: t.description.map(|d| d.to_string()),
            input_schema: serde_json::to_value(&t.input_schema)
                .unwrap_or_else(|_| serde_json::json!({"type": "object"})),
        })
        .collect();

    Ok((service, tools))
}

async fn call(service: &Service, name: &str, input: serde_json::Value) -> Result<String, McpError> {
    let arguments = match input {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    };

    tracing::debug!(tool = name, "mcp: calling tool");
    let result = service
        .call_tool(CallToolRequestParams {
            name: std::borrow::Cow::Owned(name.to_string()),
            arguments,
            meta: None,
            task: None,
        })
        .await
        .map_err(|e| McpError::ToolError(format!("tool call failed: {e}")))?;

    let text = result
        .content
        .iter()
        .filter_map(|c| c.raw.as_text().map(|t| t.text.clone()))
        .collect::<Vec<_>>()
        .join("\n");

    if result.is_error == Some(true) {
        return Err(McpError::ToolError(text));
    }
    Ok(text)
}
