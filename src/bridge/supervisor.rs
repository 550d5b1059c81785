//! Agent subprocess supervisor.
//!
//! Owns the single agent process: launches it, runs the reader/writer tasks,
//! performs the `initialize` handshake, and publishes its [`Lifecycle`] on a
//! [`watch`] channel so the session registry can forget sessions when the
//! process goes away.
//!
//! ```text
//! Stopped ──start──▶ Starting ──handshake ok──▶ Running{g}
//!                        ▲                          │ exit / stdout EOF
//!                        └────────ensure_running────┴──▶ Crashed{g}
//! ```
//!
//! Requests go out through [`Supervisor::send`], which returns an
//! [`Exchange`]: the ordered stream of raw agent messages up to and
//! including the matching response. An exchange also ends when the process
//! exits while its stdout is still held open (e.g. by a grandchild).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::handshake;
use crate::acp::link::{AcpLink, LINK_CAPACITY};
use crate::acp::messages::{
    invalid_params, method_not_found, permission_response, AcpInbound, AcpRequest,
    PermissionRequest, RpcError, SessionUpdate,
};
use crate::acp::reader::run_reader;
use crate::acp::spawner::{monitor_exit, spawn_agent, SpawnConfig};
use crate::acp::writer::run_writer;
use crate::{AppError, Result};

/// Observable state of the agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No process; initial state and the state after shutdown.
    Stopped,
    /// A process is being launched and initialized.
    Starting,
    /// Generation `generation` is up and answered `initialize`.
    Running {
        /// Start counter of the live process.
        generation: u64,
    },
    /// Generation `generation` exited or closed its stdio.
    Crashed {
        /// Start counter of the dead process.
        generation: u64,
    },
}

/// Stdio of a launched agent, plus its process handle when there is one.
pub struct LaunchedAgent {
    /// Agent input.
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Agent output.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// OS process, monitored for exit and terminated on shutdown.
    pub child: Option<Child>,
}

/// Starts agent processes for the supervisor.
///
/// [`ProcessLauncher`] spawns the configured command; tests plug in
/// in-process agents speaking over a duplex pipe.
pub trait AgentLauncher: Send + Sync {
    /// Launch a fresh agent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the agent cannot be started.
    fn launch(&self) -> Pin<Box<dyn Future<Output = Result<LaunchedAgent>> + Send + '_>>;
}

/// Launches the agent as an OS subprocess.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: SpawnConfig,
}

impl ProcessLauncher {
    /// Launcher for `config`.
    #[must_use]
    pub fn new(config: SpawnConfig) -> Self {
        Self { config }
    }
}

impl AgentLauncher for ProcessLauncher {
    fn launch(&self) -> Pin<Box<dyn Future<Output = Result<LaunchedAgent>> + Send + '_>> {
        Box::pin(async move {
            let process = spawn_agent(&self.config)?;
            Ok(LaunchedAgent {
                stdin: Box::new(process.stdin),
                stdout: Box::new(process.stdout),
                child: Some(process.child),
            })
        })
    }
}

/// Tunables for the supervisor.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// Deadline for the `initialize` answer.
    pub startup_timeout: Duration,
    /// Maximum bytes per line read from the agent.
    pub max_line_bytes: usize,
}

struct Running {
    link: AcpLink,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Owner of the agent process and its message link.
pub struct Supervisor {
    launcher: Arc<dyn AgentLauncher>,
    options: SupervisorOptions,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
    generation: u64,
    running: Option<Running>,
}

impl Supervisor {
    /// Supervisor in the [`Lifecycle::Stopped`] state.
    #[must_use]
    pub fn new(launcher: Arc<dyn AgentLauncher>, options: SupervisorOptions) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Stopped);
        Self {
            launcher,
            options,
            lifecycle: Arc::new(lifecycle),
            generation: 0,
            running: None,
        }
    }

    /// Subscribe to lifecycle transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Number of starts so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the current generation is up and its link is intact.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.running.is_some()
            && self.lifecycle()
                == Lifecycle::Running {
                    generation: self.generation,
                }
    }

    /// Launch and initialize a new agent generation.
    ///
    /// Any previous generation is torn down first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the launch or the handshake fails.
    pub async fn start(&mut self) -> Result<()> {
        self.teardown();
        self.generation += 1;
        let generation = self.generation;
        self.lifecycle.send_replace(Lifecycle::Starting);
        info!(generation, "starting agent");

        let launched = match self.launcher.launch().await {
            Ok(launched) => launched,
            Err(err) => {
                self.lifecycle.send_replace(Lifecycle::Stopped);
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(LINK_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(LINK_CAPACITY);
        let mut tasks = Vec::with_capacity(3);

        tasks.push(tokio::spawn(run_reader(
            generation,
            launched.stdout,
            self.options.max_line_bytes,
            in_tx,
            cancel.clone(),
        )));

        let stdin = launched.stdin;
        let writer_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = run_writer(generation, stdin, out_rx, writer_cancel).await {
                warn!(generation, %err, "acp writer stopped with error");
            }
        }));

        if let Some(child) = launched.child {
            let lifecycle = Arc::clone(&self.lifecycle);
            tasks.push(monitor_exit(
                generation,
                child,
                move |_reason| {
                    publish_crash(&lifecycle, generation);
                },
                cancel.clone(),
            ));
        }

        let mut link = AcpLink::new(out_tx, in_rx);
        if let Err(err) = handshake::initialize(&mut link, self.options.startup_timeout).await {
            cancel.cancel();
            self.lifecycle
                .send_replace(Lifecycle::Crashed { generation });
            return Err(err);
        }

        self.running = Some(Running {
            link,
            cancel,
            tasks,
        });
        self.lifecycle.send_replace(Lifecycle::Running { generation });
        info!(generation, "agent running");
        Ok(())
    }

    /// Restart the agent if it is not alive.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if a restart fails.
    pub async fn ensure_running(&mut self) -> Result<()> {
        if self.is_alive() {
            return Ok(());
        }
        if self.generation > 0 {
            warn!(
                generation = self.generation,
                lifecycle = ?self.lifecycle(),
                "agent not alive, restarting"
            );
        }
        self.start().await
    }

    /// Record that the current generation died and release its resources.
    pub fn mark_crashed(&mut self, reason: &str) {
        warn!(generation = self.generation, reason, "agent marked crashed");
        publish_crash(&self.lifecycle, self.generation);
        self.teardown();
    }

    /// Send `request` and return the exchange carrying its output.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SubprocessUnavailable`] if the agent is not
    /// running or its stdin is gone.
    pub async fn send(&mut self, request: &AcpRequest) -> Result<Exchange<'_>> {
        let Some(running) = self.running.as_mut() else {
            return Err(AppError::SubprocessUnavailable("agent is not running".into()));
        };

        let sent = running.link.send_request(request).await;
        match sent {
            Ok(id) => {
                debug!(id, method = request.method(), "acp request sent");
                Ok(Exchange {
                    lifecycle: self.lifecycle.subscribe(),
                    generation: self.generation,
                    supervisor: self,
                    id,
                })
            }
            Err(err) => {
                self.mark_crashed("agent stdin closed");
                Err(err)
            }
        }
    }

    /// Send `request` and wait for its response, skipping streamed output.
    ///
    /// Permission questions raised meanwhile are answered `cancelled`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SubprocessUnavailable`] if the agent dies first.
    pub async fn call(
        &mut self,
        request: &AcpRequest,
    ) -> Result<std::result::Result<Value, RpcError>> {
        let mut exchange = self.send(request).await?;
        loop {
            match exchange.next().await {
                ExchangeEvent::Finished(outcome) => return Ok(outcome),
                ExchangeEvent::Closed(reason) => {
                    return Err(AppError::SubprocessUnavailable(reason));
                }
                ExchangeEvent::Permission(question) => {
                    exchange
                        .reply(permission_response(&question.id, None))
                        .await?;
                }
                ExchangeEvent::Update { session_id, update } => {
                    debug!(%session_id, ?update, "update outside a prompt turn, skipping");
                }
            }
        }
    }

    /// Stop the agent and wait for its tasks.
    pub async fn shutdown(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            for task in running.tasks {
                if let Err(err) = task.await {
                    warn!(%err, "agent task ended abnormally");
                }
            }
        }
        self.lifecycle.send_replace(Lifecycle::Stopped);
        info!(generation = self.generation, "agent stopped");
    }

    fn teardown(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}

/// One item of an [`Exchange`].
#[derive(Debug)]
pub enum ExchangeEvent {
    /// A `session/update` notification.
    Update {
        /// Session the update belongs to.
        session_id: String,
        /// Payload.
        update: SessionUpdate,
    },
    /// A permission question that must be answered with [`Exchange::reply`].
    Permission(PermissionRequest),
    /// The response to the exchange's request.
    Finished(std::result::Result<Value, RpcError>),
    /// The agent died; the supervisor is already marked crashed.
    Closed(String),
}

/// Ordered agent output for one request.
pub struct Exchange<'a> {
    supervisor: &'a mut Supervisor,
    lifecycle: watch::Receiver<Lifecycle>,
    generation: u64,
    id: u64,
}

impl Exchange<'_> {
    /// Correlation id of the request.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next agent message for this request.
    ///
    /// Responses to other ids are dropped; agent requests the bridge does
    /// not serve are answered with an error and skipped. Output already
    /// read from the agent is delivered before a process exit is reported.
    pub async fn next(&mut self) -> ExchangeEvent {
        loop {
            let Some(running) = self.supervisor.running.as_mut() else {
                return ExchangeEvent::Closed("agent is not running".into());
            };

            let inbound = tokio::select! {
                biased;
                inbound = running.link.recv() => inbound,
                () = crashed(&mut self.lifecycle, self.generation) => AcpInbound::Closed {
                    reason: "agent process exited".into(),
                },
            };
            match inbound {
                AcpInbound::Response {
                    id: Some(id),
                    outcome,
                } if id == self.id => return ExchangeEvent::Finished(outcome),
                AcpInbound::Response { id, .. } => {
                    debug!(?id, expected = self.id, "dropping stale acp response");
                }
                AcpInbound::SessionUpdate { session_id, update } => {
                    return ExchangeEvent::Update { session_id, update };
                }
                AcpInbound::PermissionRequest(question) => {
                    return ExchangeEvent::Permission(question);
                }
                AcpInbound::UnsupportedRequest { id, method } => {
                    debug!(%method, "answering unsupported agent request");
                    if let Err(err) = running.link.send(method_not_found(&id, &method)).await {
                        warn!(%err, "failed to answer unsupported agent request");
                    }
                }
                AcpInbound::InvalidRequest { id, method, reason } => {
                    warn!(%method, %reason, "rejecting agent request with unreadable params");
                    let answer = invalid_params(&id, &method, &reason);
                    if let Err(err) = running.link.send(answer).await {
                        warn!(%err, "failed to reject agent request");
                    }
                }
                AcpInbound::Closed { reason } => {
                    self.supervisor.mark_crashed(&reason);
                    return ExchangeEvent::Closed(reason);
                }
            }
        }
    }

    /// Send a response or notification to the agent mid-exchange.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SubprocessUnavailable`] if the agent's stdin is
    /// gone; the supervisor is marked crashed.
    pub async fn reply(&mut self, message: Value) -> Result<()> {
        let Some(running) = self.supervisor.running.as_ref() else {
            return Err(AppError::SubprocessUnavailable("agent is not running".into()));
        };
        let sent = running.link.send(message).await;
        if let Err(err) = sent {
            self.supervisor.mark_crashed("agent stdin closed");
            return Err(err);
        }
        Ok(())
    }
}

/// Resolve once `generation` is published as crashed.
async fn crashed(lifecycle: &mut watch::Receiver<Lifecycle>, generation: u64) {
    let observed = lifecycle
        .wait_for(|state| *state == Lifecycle::Crashed { generation })
        .await
        .is_ok();
    if !observed {
        // Sender gone: only the link can end the exchange now.
        std::future::pending::<()>().await;
    }
}

/// Move `Running{generation}` to `Crashed{generation}`; other states are kept.
fn publish_crash(lifecycle: &watch::Sender<Lifecycle>, generation: u64) -> bool {
    lifecycle.send_if_modified(|state| {
        if *state == (Lifecycle::Running { generation }) {
            *state = Lifecycle::Crashed { generation };
            true
        } else {
            false
        }
    })
}
