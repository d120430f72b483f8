//! Local inference server supervision.
//!
//! [`ServerManager`] launches an OpenAI-compatible model server (llama.cpp's
//! `llama-server` by default), waits for its health probe, and pairs it with
//! a watchdog process that kills the worker if this process stops sending
//! heartbeats.

pub mod args;
pub mod health;
pub mod watchdog;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{Config, ServerConfig};
use health::HealthWindow;

/// Errors from the server lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The model (or draft model) file does not exist.
    #[error("model file not found: {}", .0.display())]
    ModelMissing(PathBuf),

    /// Speculative decoding is enabled but no draft model is configured.
    #[error("speculative decoding requires a draft model path")]
    DraftModelUnset,

    /// The health probe did not pass before the timeout.
    #[error("server did not become healthy within {0:?}")]
    Unresponsive(Duration),

    /// The server process exited while starting.
    #[error("server exited during startup: {0}")]
    Exited(String),

    /// No server process is running.
    #[error("server is not running")]
    NotRunning,

    /// A process could not be launched.
    #[error("failed to spawn '{}': {source}", program.display())]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Other process I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-launch options for the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    /// Model name the server reports and accepts in requests.
    pub alias: String,
    pub threads: u32,
    pub context_length: u32,
    pub use_gpu: bool,
    pub gpu_layers: u32,
    pub draft_model_path: Option<PathBuf>,
    pub speculative_decoding: bool,
    /// Maximum draft tokens per speculative step.
    pub draft_max: u32,
    /// Minimum draft tokens per speculative step.
    pub draft_min: u32,
    pub mmproj_path: Option<PathBuf>,
    /// User flags; override built-ins with the same key.
    pub extra_args: Vec<String>,
}

impl ServerOptions {
    /// Options taken from the application configuration.
    pub fn from_config(config: &Config) -> Self {
        let server = &config.server;
        Self {
            alias: config.model.clone(),
            threads: server.threads.unwrap_or_else(default_threads),
            context_length: server.context_length,
            use_gpu: server.use_gpu,
            gpu_layers: server.gpu_layers,
            draft_model_path: server.draft_model_path.clone(),
            speculative_decoding: server.speculative_decoding,
            draft_max: 16,
            draft_min: 4,
            mmproj_path: server.mmproj_path.clone(),
            extra_args: server.extra_args.clone(),
        }
    }
}

fn default_threads() -> u32 {
    std::thread::available_parallelism()
        .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
        .unwrap_or(4)
}

#[derive(Debug, Default)]
struct State {
    child: Option<Child>,
    watchdog: Option<Child>,
    heartbeat: Option<JoinHandle<()>>,
    /// Set between launch and the first passing health wait.
    starting: bool,
}

impl State {
    /// Whether the worker process is alive, reaping it if it exited.
    fn worker_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::warn!(%status, "server: worker exited");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "server: failed to poll worker");
                false
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        for (name, slot) in [("worker", &mut self.child), ("watchdog", &mut self.watchdog)] {
            if let Some(mut process) = slot.take() {
                if let Err(e) = process.kill().await {
                    tracing::debug!(process = name, error = %e, "server: kill failed");
                }
            }
        }
        self.starting = false;
    }
}

/// Supervises one local inference server.
///
/// All methods take `&self`; the process handles live behind a single async
/// mutex so concurrent `start` calls launch at most one worker. Dropping the
/// manager kills both processes.
#[derive(Debug)]
pub struct ServerManager {
    config: ServerConfig,
    http: reqwest::Client,
    state: Mutex<State>,
}

impl ServerManager {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Base URL of the server, without the `/v1` suffix.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.config.port)
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }

    /// Launch the server and its watchdog.
    ///
    /// A no-op when the server is already running or starting.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ModelMissing`] if `model_path`, or the draft
    /// model when speculative decoding is enabled, does not exist,
    /// [`ServerError::DraftModelUnset`] if speculative decoding has no draft
    /// model at all, and
    /// [`ServerError::Spawn`] if either process cannot be launched.
    pub async fn start(&self, model_path: &Path, options: &ServerOptions) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        if state.worker_alive() {
            tracing::debug!("server: already running");
            return Ok(());
        }
        state.shutdown().await;

        require_file(model_path).await?;
        if options.speculative_decoding {
            match &options.draft_model_path {
                Some(draft) => require_file(draft).await?,
                None => return Err(ServerError::DraftModelUnset),
            }
        }

        let args = args::build_args(model_path, self.config.port, options);
        tracing::info!(
            binary = %self.config.binary.display(),
            port = self.config.port,
            "server: launching"
        );
        tracing::debug!(?args, "server: arguments");

        let child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServerError::Spawn {
                program: self.config.binary.clone(),
                source,
            })?;
        let Some(pid) = child.id() else {
            return Err(ServerError::Exited("exited immediately".to_string()));
        };
        state.child = Some(child);
        state.starting = true;

        let interval = Duration::from_secs(self.config.heartbeat_secs.max(1));
        let program = match &self.config.watchdog_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        let mut watchdog = match watchdog::spawn(&program, pid, watchdog::timeout_for(interval)) {
            Ok(watchdog) => watchdog,
            Err(e) => {
                state.shutdown().await;
                return Err(e);
            }
        };
        if let Some(stdin) = watchdog.stdin.take() {
            state.heartbeat = Some(watchdog::start_heartbeat(stdin, interval));
        }
        state.watchdog = Some(watchdog);

        tracing::info!(pid, "server: started");
        Ok(())
    }

    /// Poll the health endpoint until the composite score passes.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Unresponsive`] after `timeout`,
    /// [`ServerError::Exited`] if the worker dies while waiting, and
    /// [`ServerError::NotRunning`] if nothing was started.
    pub async fn wait_until_healthy(&self, timeout: Duration) -> Result<(), ServerError> {
        let url = self.health_url();
        let started = Instant::now();
        let mut window = HealthWindow::default();

        loop {
            {
                let mut state = self.state.lock().await;
                if state.child.is_none() {
                    return Err(ServerError::NotRunning);
                }
                if !state.worker_alive() {
                    let reason = match state.child.as_mut().map(Child::try_wait) {
                        Some(Ok(Some(status))) => status.to_string(),
                        _ => "unknown status".to_string(),
                    };
                    state.shutdown().await;
                    return Err(ServerError::Exited(reason));
                }
            }

            window.record(health::probe(&self.http, &url).await);
            tracing::debug!(score = window.score(), "server: health sample");
            if window.is_healthy() {
                self.state.lock().await.starting = false;
                tracing::info!(elapsed = ?started.elapsed(), "server: healthy");
                return Ok(());
            }

            if started.elapsed() >= timeout {
                tracing::warn!(?timeout, "server: health wait timed out");
                return Err(ServerError::Unresponsive(timeout));
            }
            tokio::time::sleep(health::PROBE_INTERVAL).await;
        }
    }

    /// Start the server and wait for it with the configured timeout.
    pub async fn start_and_wait(&self, model_path: &Path, options: &ServerOptions) -> Result<(), ServerError> {
        self.start(model_path, options).await?;
        self.wait_until_healthy(Duration::from_secs(self.config.health_timeout_secs))
            .await
    }

    /// Kill the worker and the watchdog. Safe to call when stopped.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.child.is_some() {
            tracing::info!("server: stopping");
        }
        state.shutdown().await;
    }

    /// Whether the worker process is alive.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.worker_alive()
    }

    /// Whether a launch is still waiting for its first healthy probe.
    pub async fn is_starting(&self) -> bool {
        self.state.lock().await.starting
    }

    /// Process id of the worker.
    pub async fn pid(&self) -> Option<u32> {
        self.state.lock().await.child.as_ref().and_then(Child::id)
    }

    /// Process id of the watchdog.
    pub async fn watchdog_pid(&self) -> Option<u32> {
        self.state.lock().await.watchdog.as_ref().and_then(Child::id)
    }
}

async fn require_file(path: &Path) -> Result<(), ServerError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(ServerError::ModelMissing(path.to_path_buf())),
    }
}
