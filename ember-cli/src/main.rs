//! Ember CLI - run prompts against a supervised local model or a remote
//! OpenAI-compatible endpoint.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;

use commands::{Commands, handle_command};
use ember_core::config::{Config, EndpointPreference};

/// Ember - local and remote LLM inference orchestrator
#[derive(Parser)]
#[command(name = "ember")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Force the local server
    #[arg(long, global = true, conflicts_with = "remote")]
    local: bool,

    /// Force the remote endpoint
    #[arg(long, global = true)]
    remote: bool,

    /// Override the model name from config
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Args {
    /// Apply command-line overrides to the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if self.local {
            config.endpoint.prefer = EndpointPreference::Local;
        } else if self.remote {
            config.endpoint.prefer = EndpointPreference::Remote;
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // The watchdog must start before anything that could fail on config.
    if let Commands::Watchdog { pid, timeout } = args.command {
        commands::watchdog(pid, timeout).await;
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load config")?;
    args.apply(&mut config);
    handle_command(args.command, &config).await
}
