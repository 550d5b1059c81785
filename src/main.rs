#![forbid(unsafe_code)]

//! `acp-bridge`: keeps one ACP agent subprocess alive and serves it to
//! socket clients.
//!
//! Bootstraps configuration, starts the agent (failing fast if it cannot
//! be started), then runs the socket server until a shutdown signal or an
//! unrecoverable agent failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use acp_bridge::bridge::dispatcher::Dispatcher;
use acp_bridge::bridge::supervisor::{ProcessLauncher, Supervisor, SupervisorOptions};
use acp_bridge::ipc::server;
use acp_bridge::{AppError, BridgeConfig, Result};

/// Time allowed for an in-flight prompt to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-bridge", about = "ACP agent bridge over a Unix socket", version, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Instance name; the socket is `<socket-root>/<instance>.sock`.
    #[arg(long)]
    instance: Option<String>,

    /// Directory holding the instance socket.
    #[arg(long)]
    socket_root: Option<PathBuf>,

    /// Agent card passed to `fast-agent serve --card`.
    #[arg(long)]
    card: Option<PathBuf>,

    /// Working directory for the agent (defaults to the card's parent).
    #[arg(long)]
    server_cwd: Option<PathBuf>,

    /// Command launching the agent, split on whitespace (e.g. "uv run fast-agent").
    #[arg(long)]
    server_cmd: Option<String>,

    /// Max bytes per line read from the agent.
    #[arg(long)]
    stream_limit: Option<usize>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn load_config(&self) -> Result<BridgeConfig> {
        let mut config = match self.config {
            Some(ref path) => BridgeConfig::load_from_path(path)?,
            None => BridgeConfig::new("acp"),
        };

        if let Some(ref name) = self.instance {
            config.instance_name.clone_from(name);
        }
        if let Some(ref root) = self.socket_root {
            config.socket_root.clone_from(root);
        }
        if let Some(ref card) = self.card {
            config.agent.card = Some(card.clone());
        }
        if let Some(ref cwd) = self.server_cwd {
            config.agent.cwd = Some(cwd.clone());
        }
        if let Some(ref cmd) = self.server_cmd {
            config.agent.command = cmd.split_whitespace().map(str::to_owned).collect();
        }
        if let Some(limit) = self.stream_limit {
            config.stream_limit_bytes = limit;
        }
        if self.debug {
            config.debug = true;
        }
        config.apply_env();
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = args.load_config()?;
    init_tracing(args.log_format, config.debug)?;
    info!(instance = %config.instance_name, "acp-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(config))
}

async fn run(config: BridgeConfig) -> Result<()> {
    let spawn = config.spawn_config();
    info!(command = %spawn.display(), cwd = %spawn.cwd.display(), "agent entrypoint resolved");

    let supervisor = Supervisor::new(
        Arc::new(ProcessLauncher::new(spawn)),
        SupervisorOptions {
            startup_timeout: config.startup_timeout(),
            max_line_bytes: config.stream_limit_bytes,
        },
    );
    let dispatcher = Dispatcher::new(supervisor, config.working_dir(), CancellationToken::new());

    // ── Start the agent; failure here is a misconfiguration ──
    if let Err(err) = dispatcher.start().await {
        error!(%err, "agent failed to start");
        dispatcher.shutdown().await;
        return Err(err);
    }

    // ── Serve clients ───────────────────────────────────
    let ct = CancellationToken::new();
    let server_handle = server::spawn_server(&config, dispatcher.clone(), ct.clone())?;

    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = dispatcher.fatal().cancelled() => error!("agent cannot be restarted, stopping"),
    }
    ct.cancel();

    if let Err(err) = server_handle.await {
        warn!(%err, "socket server task ended abnormally");
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher.shutdown())
        .await
        .is_err()
    {
        warn!("in-flight prompt did not finish, abandoning agent");
    }

    if dispatcher.fatal().is_cancelled() {
        return Err(AppError::Spawn("agent could not be restarted".into()));
    }

    info!("acp-bridge shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat, debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
