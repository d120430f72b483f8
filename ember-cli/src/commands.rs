//! Subcommands for the `ember` binary.
//!
//! Defines the [`Commands`] enum parsed by `clap` and the [`handle_command`]
//! dispatcher.

use std::io::{self, IsTerminal, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use ember_core::agent::{Agent, AgentMode};
use ember_core::config::Config;
use ember_core::endpoint::{self, Endpoint};
use ember_core::mcp;
use ember_core::message::{Message, Role};
use ember_core::provider::{self, OpenAiCompatClient, StreamObserver};
use ember_core::server::{ServerManager, ServerOptions, watchdog};
use ember_core::status::Status;
use ember_core::telemetry;
use ember_core::tools::{TodoTool, ToolRegistry};

/// Top-level subcommands for the `ember` binary.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Send a message and stream the answer
    Ask {
        /// Message to send (reads from stdin if not provided)
        message: Option<String>,

        /// How much tool use the turn may involve
        #[arg(long, value_enum, default_value_t = Mode::Tools)]
        mode: Mode,
    },
    /// Start the local server and keep it running until interrupted
    Serve,
    /// List models served by the selected endpoint
    Models,
    /// Count tokens with the selected endpoint's tokenizer
    Tokens {
        /// Text to tokenize (reads from stdin if not provided)
        text: Option<String>,
    },
    /// Kill a process once heartbeats on stdin stop (spawned internally)
    #[command(hide = true)]
    Watchdog {
        /// Process to guard
        #[arg(long)]
        pid: u32,
        /// Seconds without a heartbeat before the process is killed
        #[arg(long)]
        timeout: u64,
    },
}

/// Agent mode as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum Mode {
    /// No tools
    Chat,
    /// Tools offered
    Tools,
    /// Deep research with sufficiency checks
    Research,
}

impl From<Mode> for AgentMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Chat => AgentMode::Chat,
            Mode::Tools => AgentMode::Tools,
            Mode::Research => AgentMode::DeepResearch,
        }
    }
}

/// Dispatch a parsed subcommand.
pub(crate) async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Ask { message, mode } => {
            let message = read_input(message).context("No message provided")?;
            ask(config, message, mode.into()).await
        }
        Commands::Serve => serve(config).await,
        Commands::Models => {
            let client = aux_client(config).await?;
            let models = client.list_models().await.context("Failed to list models")?;
            for model in models {
                println!("{model}");
            }
            Ok(())
        }
        Commands::Tokens { text } => {
            let text = read_input(text).context("No text provided")?;
            let client = aux_client(config).await?;
            let count = client
                .count_tokens(&text)
                .await
                .context("Failed to count tokens")?;
            println!("{count}");
            Ok(())
        }
        Commands::Watchdog { pid, timeout } => {
            watchdog(pid, timeout).await;
            Ok(())
        }
    }
}

/// Run the watchdog loop on this process's stdin.
pub(crate) async fn watchdog(pid: u32, timeout_secs: u64) {
    let exit = watchdog::run(pid, Duration::from_secs(timeout_secs.max(1)), tokio::io::stdin()).await;
    tracing::debug!(pid, ?exit, "watchdog: stopped");
}

async fn ask(config: &Config, message: String, mode: AgentMode) -> Result<()> {
    let endpoint = endpoint::resolve_with_probe(config).await;
    let server = start_local(config, &endpoint).await?;

    let sink = telemetry::create_telemetry(config.telemetry.as_ref())
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "telemetry disabled");
            None
        });
    let client =
        provider::create_client(config, endpoint, sink).context("Failed to create client")?;

    let mcp_client = mcp::connect(config.mcp.as_ref())
        .await
        .context("Failed to load MCP config")?;
    let mut registry = ToolRegistry::new().with_tool(Arc::new(TodoTool::new()));
    for tool in mcp_client.tools() {
        registry.register(tool);
    }

    let agent = Agent::from_config(config, Arc::new(client), registry);
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let printer = Printer;
    let outcome = agent
        .run(vec![Message::new(Role::User, message)], mode, &printer, &cancel)
        .await;
    interrupt.abort();
    println!();

    let result = match outcome {
        Ok(response) => {
            for call in &response.function_calls {
                tracing::info!(call = %call.call, kind = ?call.kind, "function call");
            }
            // Synthetic responses (circuit breaker) were never streamed.
            if response.time_to_first_token.is_none() {
                println!("{}", response.answer());
            }
            tracing::info!(
                model = %response.model,
                prompt_tokens = response.usage.prompt_tokens,
                completion_tokens = response.usage.completion_tokens,
                tokens_per_second = ?response.tokens_per_second,
                "completion finished"
            );
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            eprintln!("[Interrupted]");
            Ok(())
        }
        Err(e) => Err(e).context("Agent error"),
    };

    mcp_client.shutdown().await;
    if let Some(server) = server {
        server.stop().await;
    }
    result
}

async fn serve(config: &Config) -> Result<()> {
    let endpoint = Endpoint::local(config.server.port, config.model.clone());
    let Some(server) = start_local(config, &endpoint).await? else {
        bail!("No local server to start");
    };
    println!("Serving {} at {}/v1", config.model, server.base_url());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    server.stop().await;
    Ok(())
}

/// Start and health-check the local server when `endpoint` is local.
async fn start_local(config: &Config, endpoint: &Endpoint) -> Result<Option<ServerManager>> {
    if endpoint.is_remote() {
        return Ok(None);
    }
    let Some(model_path) = config.server.model_path.as_deref() else {
        // Assume a server someone else runs on the configured port.
        tracing::info!("no model_path configured, using an already running server");
        return Ok(None);
    };

    let manager = ServerManager::new(config.server.clone());
    eprintln!("{}", Status::ColdProcessing);
    manager
        .start_and_wait(model_path, &ServerOptions::from_config(config))
        .await
        .with_context(|| format!("Failed to start server for {}", model_path.display()))?;
    Ok(Some(manager))
}

async fn aux_client(config: &Config) -> Result<OpenAiCompatClient> {
    let endpoint = endpoint::resolve_with_probe(config).await;
    OpenAiCompatClient::new(endpoint, provider::openai_compat::DEFAULT_REQUEST_TIMEOUT)
        .context("Failed to create client")
}

/// Prints streamed text to stdout as it arrives.
struct Printer;

impl StreamObserver for Printer {
    fn on_progress(&self, fragment: &str) {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "{fragment}");
        let _ = stdout.flush();
    }

    fn on_status(&self, status: Status) {
        tracing::debug!(%status, "status");
    }
}

/// Take the positional argument, or piped stdin.
fn read_input(arg: Option<String>) -> io::Result<String> {
    if let Some(text) = arg {
        return Ok(text);
    }
    if io::stdin().is_terminal() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "nothing to read"));
    }
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_conversion() {
        assert_eq!(AgentMode::from(Mode::Chat), AgentMode::Chat);
        assert_eq!(AgentMode::from(Mode::Tools), AgentMode::Tools);
        assert_eq!(AgentMode::from(Mode::Research), AgentMode::DeepResearch);
    }

    #[test]
    fn test_read_input_prefers_argument() {
        assert_eq!(read_input(Some("hi".to_string())).unwrap(), "hi");
    }
}
