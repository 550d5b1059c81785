//! Single-flight prompt dispatcher.
//!
//! The agent's stdio conversation can only carry one prompt at a time, so
//! the supervisor and session registry live behind one mutex. Admission is
//! a `try_lock`: a second prompt is rejected immediately instead of queued.
//!
//! A prompt that fails with session loss (a `refusal` stop reason or a
//! "Session not found" error) is replayed once on a fresh session. A second
//! loss is reported to the client. Treating refusal as session loss is a
//! heuristic; a genuine policy refusal costs one extra round-trip.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acp::messages::{cancel_notification, permission_response, AcpRequest, StopReason};
use crate::bridge::permission::{PermissionCoordinator, PermissionReply};
use crate::bridge::relay::Relay;
use crate::bridge::session::SessionRegistry;
use crate::bridge::supervisor::{Exchange, ExchangeEvent, Supervisor};
use crate::ipc::protocol::{PromptRequest, ServiceMessage};
use crate::{AppError, Result};

/// State owned by the admitted request.
pub struct BridgeCore {
    supervisor: Supervisor,
    registry: SessionRegistry,
    cwd: PathBuf,
}

/// Exclusive right to use the agent, held for the duration of one prompt.
pub struct Permit {
    core: OwnedMutexGuard<BridgeCore>,
}

/// Shared handle admitting and running prompts.
#[derive(Clone)]
pub struct Dispatcher {
    core: Arc<Mutex<BridgeCore>>,
    fatal: CancellationToken,
}

impl Dispatcher {
    /// Dispatcher over `supervisor`; sessions are created in `cwd`.
    ///
    /// `fatal` is cancelled when the agent cannot be restarted.
    #[must_use]
    pub fn new(supervisor: Supervisor, cwd: PathBuf, fatal: CancellationToken) -> Self {
        let registry = SessionRegistry::new(supervisor.subscribe());
        Self {
            core: Arc::new(Mutex::new(BridgeCore {
                supervisor,
                registry,
                cwd,
            })),
            fatal,
        }
    }

    /// Start the agent for the first time.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the agent cannot be started.
    pub async fn start(&self) -> Result<()> {
        self.core.lock().await.supervisor.start().await
    }

    /// Stop the agent once the in-flight prompt, if any, has finished.
    pub async fn shutdown(&self) {
        self.core.lock().await.supervisor.shutdown().await;
    }

    /// Token cancelled on an unrecoverable agent failure.
    #[must_use]
    pub fn fatal(&self) -> &CancellationToken {
        &self.fatal
    }

    /// Try to claim the agent; `None` while another prompt is in flight.
    #[must_use]
    pub fn try_admit(&self) -> Option<Permit> {
        Arc::clone(&self.core)
            .try_lock_owned()
            .ok()
            .map(|core| Permit { core })
    }

    /// Run an admitted prompt to completion.
    ///
    /// Streams chunk, tool and permission messages to `out` and finishes
    /// with exactly one `done` or `error`. The permit is released before
    /// the terminal message is sent, so a client may follow up at once.
    /// Output to a closed `out` is discarded; the prompt still runs to its
    /// end against the agent.
    pub async fn run(
        &self,
        permit: Permit,
        request: PromptRequest,
        out: mpsc::Sender<ServiceMessage>,
        mut replies: mpsc::Receiver<PermissionReply>,
    ) {
        let mut core = permit.core;
        let outcome = core.execute(&request, &out, &mut replies).await;
        drop(core);

        let terminal = match outcome {
            Ok(session_id) => {
                info!(%session_id, "prompt completed");
                ServiceMessage::Done { session_id }
            }
            Err(err @ AppError::Spawn(_)) => {
                error!(%err, "agent restart failed, shutting down");
                self.fatal.cancel();
                ServiceMessage::error(&err)
            }
            Err(err) => {
                warn!(%err, "prompt failed");
                ServiceMessage::error(&err)
            }
        };

        if out.send(terminal).await.is_err() {
            debug!("client gone before the terminal message");
        }
    }
}

impl BridgeCore {
    async fn execute(
        &mut self,
        request: &PromptRequest,
        out: &mpsc::Sender<ServiceMessage>,
        replies: &mut mpsc::Receiver<PermissionReply>,
    ) -> Result<String> {
        let mut requested = request.requested_session().map(str::to_owned);
        let mut recovered = false;

        loop {
            self.supervisor.ensure_running().await?;

            let session_id = match self.registry.resolve(requested.as_deref()) {
                Some(id) => id,
                None => self.create_session().await?,
            };

            match prompt_turn(&mut self.supervisor, &session_id, request, out, replies).await {
                Ok(()) => {
                    self.registry.record_success(&session_id);
                    return Ok(session_id);
                }
                Err(err @ (AppError::Refused(_) | AppError::SessionLost(_))) if !recovered => {
                    warn!(%session_id, %err, "treating failure as session loss, retrying once");
                    self.registry.begin_recovery(&session_id);
                    recovered = true;
                    requested = None;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn create_session(&mut self) -> Result<String> {
        let outcome = self
            .supervisor
            .call(&AcpRequest::new_session(&self.cwd))
            .await?;
        let result = outcome.map_err(|err| AppError::Acp(format!("session/new failed: {err}")))?;

        let session_id = result
            .get("sessionId")
            .and_then(serde_json::Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Acp("session/new did not return a session id".into()))?;

        self.registry.record_created(session_id);
        Ok(session_id.to_owned())
    }
}

/// One `session/set_mode` + `session/prompt` round on `session_id`.
async fn prompt_turn(
    supervisor: &mut Supervisor,
    session_id: &str,
    request: &PromptRequest,
    out: &mpsc::Sender<ServiceMessage>,
    replies: &mut mpsc::Receiver<PermissionReply>,
) -> Result<()> {
    if let Some(mode_id) = request.requested_mode() {
        let outcome = supervisor
            .call(&AcpRequest::SetMode {
                session_id: session_id.to_owned(),
                mode_id: mode_id.to_owned(),
            })
            .await?;
        match outcome {
            Ok(_) => debug!(session_id, mode_id, "mode applied"),
            Err(err) if err.is_session_not_found() => {
                return Err(AppError::SessionLost(err.to_string()));
            }
            Err(err) => return Err(AppError::Acp(format!("session/set_mode failed: {err}"))),
        }
    }

    let mut relay = Relay::new(session_id, request);
    let permissions = PermissionCoordinator::new(request);
    let mut exchange = supervisor
        .send(&AcpRequest::Prompt {
            session_id: session_id.to_owned(),
            text: request.prompt.clone(),
        })
        .await?;

    loop {
        match exchange.next().await {
            ExchangeEvent::Update {
                session_id: from,
                update,
            } => {
                if let Some(message) = relay.translate(&from, update) {
                    // Closed receiver: the client left, keep draining the agent.
                    let _ = out.send(message).await;
                }
            }
            ExchangeEvent::Permission(question) => {
                let decision = match permissions.resolve(&question, out, replies).await {
                    Ok(decision) => decision,
                    Err(err) => {
                        warn!(session_id, %err, "abandoning prompt");
                        abandon(&mut exchange, &question.id, session_id).await;
                        return Err(err);
                    }
                };
                exchange
                    .reply(permission_response(&question.id, decision.option_id()))
                    .await?;
            }
            ExchangeEvent::Finished(Ok(result)) => {
                return match StopReason::from_result(&result) {
                    StopReason::Refusal => Err(AppError::Refused(session_id.to_owned())),
                    StopReason::EndTurn => Ok(()),
                    other => {
                        debug!(session_id, stop_reason = ?other, "prompt ended");
                        Ok(())
                    }
                };
            }
            ExchangeEvent::Finished(Err(err)) if err.is_session_not_found() => {
                return Err(AppError::SessionLost(err.to_string()));
            }
            ExchangeEvent::Finished(Err(err)) => {
                return Err(AppError::Acp(format!("session/prompt failed: {err}")));
            }
            ExchangeEvent::Closed(reason) => {
                return Err(AppError::SubprocessUnavailable(reason));
            }
        }
    }
}

/// Cancel the pending permission and the prompt, then drain the exchange so
/// the next request starts on a quiet stream.
async fn abandon(exchange: &mut Exchange<'_>, question_id: &serde_json::Value, session_id: &str) {
    if exchange
        .reply(permission_response(question_id, None))
        .await
        .is_err()
    {
        return;
    }
    if exchange.reply(cancel_notification(session_id)).await.is_err() {
        return;
    }

    loop {
        match exchange.next().await {
            ExchangeEvent::Finished(_) | ExchangeEvent::Closed(_) => return,
            ExchangeEvent::Permission(question) => {
                if exchange
                    .reply(permission_response(&question.id, None))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            ExchangeEvent::Update { .. } => {}
        }
    }
}
