//! Permission coordination between the agent and the socket client.
//!
//! A permission question either gets an automatic answer (when the prompt
//! carried `auto_approve` or `allow_always`) or is forwarded to the client,
//! and the request waits for the matching `permission_response`.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::acp::messages::PermissionRequest;
use crate::ipc::protocol::{PermissionChoice, PromptRequest, ServiceMessage};
use crate::{AppError, Result};

/// Option id answered when `auto_approve` is set.
pub const ALLOW_ONCE: &str = "allow_once";

/// Option id answered when `allow_always` is set.
pub const ALLOW_ALWAYS: &str = "allow_always";

/// A client's `permission_response`; `None` means the client declined to choose.
pub type PermissionReply = Option<String>;

/// Outcome forwarded to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    /// The named option was chosen.
    Selected(String),
    /// No valid choice was made.
    Cancelled,
}

impl PermissionDecision {
    /// Chosen option id, if any.
    #[must_use]
    pub fn option_id(&self) -> Option<&str> {
        match self {
            Self::Selected(id) => Some(id),
            Self::Cancelled => None,
        }
    }
}

/// Answers permission questions for one in-flight prompt.
#[derive(Debug, Clone, Copy)]
pub struct PermissionCoordinator {
    auto_approve: bool,
    allow_always: bool,
}

impl PermissionCoordinator {
    /// Coordinator honouring the prompt's approval flags.
    #[must_use]
    pub fn new(request: &PromptRequest) -> Self {
        Self {
            auto_approve: request.auto_approve,
            allow_always: request.allow_always,
        }
    }

    /// Answer chosen without asking the client, when the flags allow it.
    ///
    /// Prefers an offered option with the exact id, then one of the same
    /// kind, then the bare id.
    #[must_use]
    pub fn automatic(&self, question: &PermissionRequest) -> Option<String> {
        let wanted = if self.allow_always {
            ALLOW_ALWAYS
        } else if self.auto_approve {
            ALLOW_ONCE
        } else {
            return None;
        };

        let option = question
            .options
            .iter()
            .find(|o| o.option_id == wanted)
            .or_else(|| {
                question
                    .options
                    .iter()
                    .find(|o| o.kind.as_deref() == Some(wanted))
            });
        Some(option.map_or_else(|| wanted.to_owned(), |o| o.option_id.clone()))
    }

    /// Resolve `question`, asking the client through `out` when needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::PermissionAbandoned`] if the client connection
    /// is gone before an answer arrives.
    pub async fn resolve(
        &self,
        question: &PermissionRequest,
        out: &mpsc::Sender<ServiceMessage>,
        replies: &mut mpsc::Receiver<PermissionReply>,
    ) -> Result<PermissionDecision> {
        if let Some(option_id) = self.automatic(question) {
            info!(title = %question.title, %option_id, "permission answered automatically");
            return Ok(PermissionDecision::Selected(option_id));
        }

        while let Ok(stale) = replies.try_recv() {
            debug!(?stale, "discarding permission response sent before the question");
        }

        out.send(ask(question))
            .await
            .map_err(|_| AppError::PermissionAbandoned("client connection closed".into()))?;

        let Some(reply) = replies.recv().await else {
            return Err(AppError::PermissionAbandoned(
                "client disconnected while permission was pending".into(),
            ));
        };

        Ok(decide(question, reply))
    }
}

fn ask(question: &PermissionRequest) -> ServiceMessage {
    ServiceMessage::PermissionRequest {
        title: question.title.clone(),
        options: question
            .options
            .iter()
            .map(|o| PermissionChoice {
                option_id: o.option_id.clone(),
                name: o.name.clone(),
            })
            .collect(),
    }
}

fn decide(question: &PermissionRequest, reply: PermissionReply) -> PermissionDecision {
    match reply {
        Some(id) if question.options.iter().any(|o| o.option_id == id) => {
            info!(title = %question.title, option_id = %id, "permission answered by client");
            PermissionDecision::Selected(id)
        }
        Some(id) => {
            warn!(option_id = %id, "client chose an option that was not offered, cancelling");
            PermissionDecision::Cancelled
        }
        None => {
            warn!(title = %question.title, "client sent no option, cancelling");
            PermissionDecision::Cancelled
        }
    }
}
