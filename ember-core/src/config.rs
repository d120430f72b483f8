//! Configuration management for Ember.
//!
//! Provides configuration loading from TOML files with support for
//! multiple file locations, environment variable overrides, and sensible defaults.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the configuration file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as TOML.
    #[error("failed to parse config file '{path}': {source}")]
    ParseError {
        /// Path to the configuration file that could not be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Model name sent in completion requests and used as the server alias.
    #[serde(default = "default_model")]
    pub model: String,

    /// Optional system prompt prepended to every conversation.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Local inference server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Local/remote endpoint selection.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Agent loop settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Optional telemetry store.
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,

    /// Optional MCP tool servers.
    #[serde(default)]
    pub mcp: Option<McpSettings>,
}

fn default_model() -> String {
    "local-model".to_string()
}

/// Settings for the locally supervised inference server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    /// Server executable (looked up on `PATH` when not absolute).
    #[serde(default = "default_server_binary")]
    pub binary: PathBuf,

    /// Model weights file.
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Port the server listens on (bound to 127.0.0.1).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Context length in tokens.
    #[serde(default = "default_context_length")]
    pub context_length: u32,

    /// Worker threads; defaults to the number of available CPUs.
    #[serde(default)]
    pub threads: Option<u32>,

    /// Offload layers to the GPU.
    #[serde(default = "default_true")]
    pub use_gpu: bool,

    /// Layers to offload when `use_gpu` is set.
    #[serde(default = "default_gpu_layers")]
    pub gpu_layers: u32,

    /// Speculative decoding draft model.
    #[serde(default)]
    pub draft_model_path: Option<PathBuf>,

    /// Enable speculative decoding with `draft_model_path`.
    #[serde(default)]
    pub speculative_decoding: bool,

    /// Multimodal projector file.
    #[serde(default)]
    pub mmproj_path: Option<PathBuf>,

    /// Extra flags appended verbatim; they override built-in flags with the
    /// same key.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Program spawned as the watchdog; defaults to the running executable.
    #[serde(default)]
    pub watchdog_program: Option<PathBuf>,

    /// Seconds between heartbeats sent to the watchdog.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Seconds to wait for the health probe after launch.
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

fn default_server_binary() -> PathBuf {
    PathBuf::from("llama-server")
}

fn default_port() -> u16 {
    4579
}

fn default_context_length() -> u32 {
    16_384
}

fn default_true() -> bool {
    true
}

fn default_gpu_layers() -> u32 {
    99
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_health_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: default_server_binary(),
            model_path: None,
            port: default_port(),
            context_length: default_context_length(),
            threads: None,
            use_gpu: true,
            gpu_layers: default_gpu_layers(),
            draft_model_path: None,
            speculative_decoding: false,
            mmproj_path: None,
            extra_args: Vec::new(),
            watchdog_program: None,
            heartbeat_secs: default_heartbeat_secs(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

/// Explicit endpoint choice that overrides automatic selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointPreference {
    /// Remote when enabled and reachable, otherwise local.
    #[default]
    Auto,
    /// Always the local server.
    Local,
    /// Always the remote endpoint.
    Remote,
}

/// Remote endpoint settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of an OpenAI-compatible server.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Bearer token for the remote server; `EMBER_API_KEY` takes precedence.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name on the remote server; defaults to the top-level model.
    #[serde(default)]
    pub remote_model: Option<String>,

    /// Prefer the remote endpoint when it is reachable.
    #[serde(default)]
    pub use_remote: bool,

    /// Explicit override.
    #[serde(default)]
    pub prefer: EndpointPreference,

    /// Streaming request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per request when the network fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_request_timeout_secs() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            api_key: None,
            remote_model: None,
            use_remote: false,
            prefer: EndpointPreference::Auto,
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    /// Follow-up requests allowed after the initial one.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Consecutive all-malformed responses before the loop gives up.
    #[serde(default = "default_malformed_threshold")]
    pub malformed_threshold: u32,

    /// Shrink function results when the context window overflows.
    #[serde(default = "default_true")]
    pub compression: bool,

    /// Compression retries per turn.
    #[serde(default = "default_compression_attempts")]
    pub compression_attempts: u32,

    /// Ask a secondary model whether enough information was gathered.
    #[serde(default = "default_true")]
    pub sufficiency_check: bool,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_iterations() -> u32 {
    30
}

fn default_malformed_threshold() -> u32 {
    3
}

fn default_compression_attempts() -> u32 {
    3
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            malformed_threshold: default_malformed_threshold(),
            compression: true,
            compression_attempts: default_compression_attempts(),
            sufficiency_check: true,
            temperature: default_temperature(),
        }
    }
}

/// Telemetry store settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryConfig {
    /// Database URL, e.g. `sqlite:~/.local/share/ember/telemetry.db`.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// MCP (Model Context Protocol) settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpSettings {
    /// Path to the MCP servers JSON file.
    #[serde(default)]
    pub config_path: Option<String>,
}

impl Config {
    /// Load configuration from file system.
    ///
    /// Priority order:
    /// 1. EMBER_CONFIG environment variable
    /// 2. ./config.toml (local directory)
    /// 3. ~/.config/ember/config.toml (user config)
    ///
    /// Returns default config if no config file found.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if a found file cannot be read.
    /// Returns [`ConfigError::ParseError`] if a found file is not valid TOML.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("EMBER_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                return Self::load_from(p);
            }
        }

        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Self::load_from(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config/ember/config.toml");
            if user_config.exists() {
                return Self::load_from(user_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the file cannot be read.
    /// Returns [`ConfigError::ParseError`] if the file is not valid TOML.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// API key for the remote endpoint.
    ///
    /// Priority: `EMBER_API_KEY` environment variable > `endpoint.api_key`.
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("EMBER_API_KEY")
            && !key.is_empty()
        {
            return Some(key);
        }
        self.endpoint.api_key.clone()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: None,
            server: ServerConfig::default(),
            endpoint: EndpointConfig::default(),
            agent: AgentConfig::default(),
            telemetry: None,
            mcp: None,
        }
    }
}
