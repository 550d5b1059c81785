//! ACP agent process spawner.
//!
//! Spawns the agent subprocess with piped stdin/stdout, inherited stderr,
//! and `kill_on_drop(true)` so a dropped handle never leaks a process.
//! Shutdown is graceful on unix: `SIGTERM`, a grace period, then `SIGKILL`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Time a terminated agent gets to exit before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Configuration for spawning the agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Program to execute (resolved through `PATH`).
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory of the child process.
    pub cwd: PathBuf,
}

impl SpawnConfig {
    /// Command line rendered for logs and error messages.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A running agent process with its captured stdio.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child process handle: kept alive so `kill_on_drop` works.
    pub child: Child,
    /// Agent's stdin for JSON-RPC requests.
    pub stdin: ChildStdin,
    /// Agent's stdout carrying JSON-RPC responses and notifications.
    pub stdout: ChildStdout,
}

/// Spawn the agent process described by `config`.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn agent …")`: the binary is missing
///   or the OS refused to start it.
/// - `AppError::Spawn("failed to capture agent …")`: stdio was not piped.
pub fn spawn_agent(config: &SpawnConfig) -> Result<AgentProcess> {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args)
        .current_dir(&config.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to spawn agent `{}`: {err}",
            config.display()
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;

    info!(
        pid = child.id().unwrap_or(0),
        command = %config.display(),
        cwd = %config.cwd.display(),
        "agent process spawned"
    );

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
    })
}

/// Spawn a task that waits for the child to exit.
///
/// On an unexpected exit `on_exit` is called with a human-readable reason.
/// When `cancel` fires first the child is terminated gracefully and
/// `on_exit` is not called.
#[must_use]
pub fn monitor_exit<F>(
    generation: u64,
    mut child: Child,
    on_exit: F,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    F: FnOnce(String) + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => {
                let reason = match result {
                    Ok(status) => status.code().map_or_else(
                        || "process terminated by signal".to_owned(),
                        |c| format!("process exited with code {c}"),
                    ),
                    Err(err) => {
                        warn!(generation, %err, "error waiting for agent child process");
                        format!("wait error: {err}")
                    }
                };
                warn!(generation, reason = %reason, "agent process exited");
                on_exit(reason);
            }
            () = cancel.cancelled() => {
                info!(generation, "monitor_exit: cancellation received, stopping agent");
                terminate(&mut child).await;
            }
        }
    })
}

/// Stop `child`: `SIGTERM`, wait up to [`TERMINATE_GRACE`], then kill.
pub async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(pid, %err, "failed to send SIGTERM to agent");
        }
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(Ok(status)) => info!(?status, "agent process stopped"),
        Ok(Err(err)) => warn!(%err, "error waiting for agent to stop"),
        Err(_elapsed) => {
            warn!("agent ignored SIGTERM, killing");
            child.kill().await.ok();
        }
    }
}
