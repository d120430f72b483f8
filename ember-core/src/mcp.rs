//! MCP (Model Context Protocol) tool source.
//!
//! Loads the server list, connects to each server, and exposes the
//! discovered tools to the agent's tool registry.

mod client;
mod protocol;

pub use client::McpClient;
pub use protocol::{McpConfig, McpServerConfig};

use std::path::{Path, PathBuf};

use crate::config::McpSettings;

/// Errors that occur during MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to load or parse MCP configuration.
    #[error("MCP config error: {0}")]
    ConfigError(String),

    /// Failed to connect to an MCP server.
    #[error("MCP connection error for server '{server}': {message}")]
    ConnectionError {
        /// Name of the server that failed.
        server: String,
        /// Error message.
        message: String,
    },

    /// A tool call failed.
    #[error("MCP tool error: {0}")]
    ToolError(String),

    /// IO error during MCP operations.
    #[error("MCP IO error: {0}")]
    IoError(String),
}

/// Load the MCP server list.
///
/// Path resolution priority:
/// 1. `EMBER_MCP_CONFIG` environment variable
/// 2. `[mcp] config_path` from config.toml
/// 3. `~/.config/ember/mcp_servers.json`
///
/// Returns `None` when no file exists.
///
/// # Errors
///
/// Returns [`McpError::IoError`] if the file cannot be read and
/// [`McpError::ConfigError`] if it is not valid JSON.
pub fn load_mcp_config(settings: Option<&McpSettings>) -> Result<Option<McpConfig>, McpError> {
    let configured = settings.and_then(|s| s.config_path.as_deref());
    match resolve_config_path(configured) {
        Some(path) if path.exists() => read_config(&path).map(Some),
        _ => Ok(None),
    }
}

/// Connect to the configured MCP servers, if any.
///
/// # Errors
///
/// Propagates [`load_mcp_config`] failures; servers that fail to start are
/// skipped.
pub async fn connect(settings: Option<&McpSettings>) -> Result<McpClient, McpError> {
    match load_mcp_config(settings)? {
        Some(config) => Ok(McpClient::connect(&config).await),
        None => Ok(McpClient::empty()),
    }
}

fn read_config(path: &Path) -> Result<McpConfig, McpError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| McpError::IoError(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| McpError::ConfigError(format!("failed to parse {}: {e}", path.display())))
}

fn resolve_config_path(configured: Option<&str>) -> Option<PathBuf> {
    if let Ok(path) = std::env::var("EMBER_MCP_CONFIG")
        && !path.is_empty()
    {
        return Some(PathBuf::from(path));
    }
    if let Some(path) = configured {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".config/ember/mcp_servers.json"))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use uuid::Uuid;

    use super::*;

    /// Serializes tests that touch `EMBER_MCP_CONFIG`.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn write_config(server: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ember-mcp-{}.json", Uuid::new_v4()));
        let json = format!(r#"{{"mcpServers": {{"{server}": {{"command": "true"}}}}}}"#);
        std::fs::write(&path, json).unwrap();
        path
    }

    fn settings(path: &Path) -> McpSettings {
        McpSettings {
            config_path: Some(path.to_string_lossy().into_owned()),
        }
    }

    #[test]
    fn test_error_display() {
        let err = McpError::ConnectionError {
            server: "search".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "MCP connection error for server 'search': connection refused"
        );
        assert_eq!(
            McpError::ToolError("boom".to_string()).to_string(),
            "MCP tool error: boom"
        );
    }

    #[test]
    fn test_missing_file_is_none() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var("EMBER_MCP_CONFIG") };
        let missing = std::env::temp_dir().join(format!("ember-mcp-{}.json", Uuid::new_v4()));
        assert!(load_mcp_config(Some(&settings(&missing))).unwrap().is_none());
    }

    #[test]
    fn test_loads_configured_path() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var("EMBER_MCP_CONFIG") };
        let path = write_config("calc");

        let config = load_mcp_config(Some(&settings(&path))).unwrap().unwrap();
        assert!(config.mcp_servers.contains_key("calc"));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_env_overrides_configured_path() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let env_path = write_config("from-env");
        unsafe { std::env::set_var("EMBER_MCP_CONFIG", &env_path) };

        let config = load_mcp_config(Some(&settings(Path::new("/nonexistent/mcp.json"))))
            .unwrap()
            .unwrap();
        assert!(config.mcp_servers.contains_key("from-env"));

        unsafe { std::env::remove_var("EMBER_MCP_CONFIG") };
        let _ = std::fs::remove_file(env_path);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var("EMBER_MCP_CONFIG") };
        let path = std::env::temp_dir().join(format!("ember-mcp-{}.json", Uuid::new_v4()));
        std::fs::write(&path, "not json").unwrap();

        let err = load_mcp_config(Some(&settings(&path))).unwrap_err();
        assert!(matches!(err, McpError::ConfigError(_)));

        let _ = std::fs::remove_file(path);
    }
}
