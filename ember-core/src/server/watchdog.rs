//! Watchdog companion process.
//!
//! The parent spawns `<program> watchdog --pid <server pid> --timeout <secs>`
//! with a piped stdin and writes one heartbeat byte at a fixed interval. The
//! watchdog kills the server once heartbeats stop, so the worker never
//! outlives a crashed parent.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use super::ServerError;

/// Byte written on every heartbeat.
const HEARTBEAT: &[u8] = b"\n";

/// Why the watchdog stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogExit {
    /// No heartbeat arrived within the timeout.
    Timeout,
    /// The parent closed stdin.
    Closed,
}

/// Watchdog timeout for a heartbeat interval: three missed beats.
pub fn timeout_for(interval: Duration) -> Duration {
    interval * 3
}

/// Spawn the watchdog process for `pid`.
pub(crate) fn spawn(program: &Path, pid: u32, timeout: Duration) -> Result<Child, ServerError> {
    let timeout_secs = timeout.as_secs().max(1);
    tracing::debug!(
        program = %program.display(),
        pid,
        timeout_secs,
        "server: spawning watchdog"
    );
    Command::new(program)
        .arg("watchdog")
        .arg("--pid")
        .arg(pid.to_string())
        .arg("--timeout")
        .arg(timeout_secs.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ServerError::Spawn {
            program: program.to_path_buf(),
            source,
        })
}

/// Write one heartbeat byte to `stdin` every `interval`.
///
/// The task ends when the watchdog's stdin can no longer be written.
pub(crate) fn start_heartbeat(mut stdin: ChildStdin, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let sent = match stdin.write_all(HEARTBEAT).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                tracing::warn!(error = %e, "server: watchdog heartbeat failed");
                break;
            }
        }
    })
}

/// Run the watchdog loop: wait for heartbeats on `input`, then kill `pid`.
///
/// Returns once the process has been signalled.
pub async fn run<R>(pid: u32, timeout: Duration, mut input: R) -> WatchdogExit
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    let exit = loop {
        match tokio::time::timeout(timeout, input.read(&mut buf)).await {
            Ok(Ok(0)) => break WatchdogExit::Closed,
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "watchdog: read failed");
                break WatchdogExit::Closed;
            }
            Err(_) => break WatchdogExit::Timeout,
        }
    };
    tracing::info!(pid, reason = ?exit, "watchdog: terminating server");
    terminate(pid);
    exit
}

/// Forcefully kill `pid`.
#[cfg(unix)]
pub fn terminate(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        tracing::warn!(pid, "watchdog: pid out of range");
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(
            pid,
            error = %std::io::Error::last_os_error(),
            "watchdog: kill failed"
        );
    }
}

/// Forcefully kill `pid`.
#[cfg(not(unix))]
pub fn terminate(pid: u32) {
    let result = std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        tracing::debug!(pid, error = %e, "watchdog: taskkill failed");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sleeper() -> Child {
        Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_timeout_is_three_intervals() {
        assert_eq!(timeout_for(Duration::from_secs(15)), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_closed_input_kills_process() {
        let mut child = sleeper();
        let pid = child.id().unwrap();

        let exit = run(pid, Duration::from_secs(30), tokio::io::empty()).await;
        assert_eq!(exit, WatchdogExit::Closed);

        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_missing_heartbeat_kills_process() {
        let mut child = sleeper();
        let pid = child.id().unwrap();
        let (_parent, watchdog_end) = tokio::io::duplex(8);

        let exit = run(pid, Duration::from_millis(100), watchdog_end).await;
        assert_eq!(exit, WatchdogExit::Timeout);

        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_heartbeats_keep_process_alive() {
        let mut child = sleeper();
        let pid = child.id().unwrap();
        let (mut parent, watchdog_end) = tokio::io::duplex(8);

        let watchdog = tokio::spawn(run(pid, Duration::from_millis(300), watchdog_end));
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            parent.write_all(HEARTBEAT).await.unwrap();
            assert!(child.try_wait().unwrap().is_none());
        }

        drop(parent);
        assert_eq!(watchdog.await.unwrap(), WatchdogExit::Closed);
        assert!(!child.wait().await.unwrap().success());
    }
}
