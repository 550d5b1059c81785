//! Client-facing line protocol.
//!
//! Request (client → bridge, one JSON object per line):
//! ```json
//! {"type": "prompt", "session_id": null, "prompt": "hello", "mode_id": null,
//!  "auto_approve": false, "allow_always": false, "show_tools": true,
//!  "strip_leading_newlines": true}
//! {"type": "permission_response", "option_id": "allow_once"}
//! ```
//!
//! Response (bridge → client, one JSON object per line):
//! ```json
//! {"type": "chunk", "text": "Hel"}
//! {"type": "tool", "event": "tool_call_start", "title": "Read file"}
//! {"type": "permission_request", "title": "Write file",
//!  "options": [{"option_id": "allow_once", "name": "Allow once"}]}
//! {"type": "error", "message": "ACP service busy; try again later."}
//! {"type": "done", "session_id": "sess-1"}
//! ```

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// A message sent by a socket client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a prompt turn.
    Prompt(PromptRequest),
    /// Answer to a pending `permission_request`.
    PermissionResponse {
        /// Chosen option; `null` cancels.
        #[serde(default)]
        option_id: Option<String>,
    },
}

/// A client prompt and its behavioural flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    /// Session to resume; `null` or blank starts a new one.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Prompt text.
    #[serde(default)]
    pub prompt: String,
    /// Optional mode (agent) to switch to before prompting.
    #[serde(default)]
    pub mode_id: Option<String>,
    /// Answer permission requests automatically.
    #[serde(default)]
    pub auto_approve: bool,
    /// Answer permission requests automatically with `allow_always`.
    #[serde(default)]
    pub allow_always: bool,
    /// Relay tool lifecycle events.
    #[serde(default)]
    pub show_tools: bool,
    /// Strip newlines preceding the first streamed text.
    #[serde(default)]
    pub strip_leading_newlines: bool,
}

impl PromptRequest {
    /// Requested session, with blank identifiers treated as absent.
    #[must_use]
    pub fn requested_session(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Requested mode, with blank identifiers treated as absent.
    #[must_use]
    pub fn requested_mode(&self) -> Option<&str> {
        self.mode_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Check the request before it is admitted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the prompt text is empty.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(AppError::Protocol("prompt is required.".into()));
        }
        Ok(())
    }
}

/// Tool lifecycle event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEvent {
    /// A tool call started.
    ToolCallStart,
    /// A running tool call changed.
    ToolCallUpdate,
}

/// One permission choice shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionChoice {
    /// Identifier to send back in `permission_response`.
    pub option_id: String,
    /// Display name.
    pub name: String,
}

/// A message sent by the bridge to a socket client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceMessage {
    /// Streamed assistant text.
    Chunk {
        /// Text to append.
        text: String,
    },
    /// Tool lifecycle event.
    Tool {
        /// Event kind.
        event: ToolEvent,
        /// Display title.
        title: String,
    },
    /// The agent asks for permission to run a tool.
    PermissionRequest {
        /// Tool call title.
        title: String,
        /// Offered choices.
        options: Vec<PermissionChoice>,
    },
    /// Terminal failure.
    Error {
        /// Human-readable reason.
        message: String,
    },
    /// Terminal success.
    Done {
        /// Authoritative session identifier for the next prompt.
        session_id: String,
    },
}

impl ServiceMessage {
    /// Build an `error` message from an application error.
    #[must_use]
    pub fn error(err: &AppError) -> Self {
        Self::Error {
            message: err.client_message(),
        }
    }

    /// Whether this message ends an exchange.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}

/// Decode one line received from a client.
///
/// Returns `Ok(None)` for blank lines.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if the line is not a known message.
pub fn decode_client_line(line: &str) -> Result<Option<ClientMessage>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|err| AppError::Protocol(format!("invalid json: {err}")))
}

/// Encode a message as a single JSON line (without the trailing newline).
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialization fails.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    serde_json::to_string(message)
        .map_err(|err| AppError::Protocol(format!("serialization failed: {err}")))
}
