//! Translation of agent session updates into client messages.
//!
//! One update yields at most one client message; nothing is buffered or
//! reordered.

use tracing::debug;

use crate::acp::messages::SessionUpdate;
use crate::ipc::protocol::{PromptRequest, ServiceMessage, ToolEvent};

/// Per-request update translator.
#[derive(Debug)]
pub struct Relay {
    session_id: String,
    show_tools: bool,
    strip_leading_newlines: bool,
    started: bool,
}

impl Relay {
    /// Relay for a prompt running on `session_id`.
    #[must_use]
    pub fn new(session_id: impl Into<String>, request: &PromptRequest) -> Self {
        Self {
            session_id: session_id.into(),
            show_tools: request.show_tools,
            strip_leading_newlines: request.strip_leading_newlines,
            started: false,
        }
    }

    /// Translate one update received for `session_id`.
    pub fn translate(&mut self, session_id: &str, update: SessionUpdate) -> Option<ServiceMessage> {
        if session_id != self.session_id {
            debug!(
                session_id,
                expected = %self.session_id,
                "dropping update for another session"
            );
            return None;
        }

        match update {
            SessionUpdate::AgentMessageChunk { text } => self.chunk(text),
            SessionUpdate::ToolCallStart { title } => self.tool(ToolEvent::ToolCallStart, title),
            SessionUpdate::ToolCallUpdate { title } => self.tool(ToolEvent::ToolCallUpdate, title),
            SessionUpdate::Other { kind } => {
                debug!(%kind, "ignoring session update");
                None
            }
        }
    }

    fn chunk(&mut self, text: String) -> Option<ServiceMessage> {
        let text = if self.strip_leading_newlines && !self.started {
            text.trim_start_matches('\n').to_owned()
        } else {
            text
        };
        if text.is_empty() {
            return None;
        }
        self.started = true;
        Some(ServiceMessage::Chunk { text })
    }

    fn tool(&self, event: ToolEvent, title: String) -> Option<ServiceMessage> {
        if !self.show_tools {
            debug!(?event, %title, "tool event hidden");
            return None;
        }
        Some(ServiceMessage::Tool { event, title })
    }
}
