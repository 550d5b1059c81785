//! Agent Client Protocol vocabulary (the subset the bridge speaks).
//!
//! The subprocess talks JSON-RPC 2.0 over NDJSON. Outbound requests are
//! built from [`AcpRequest`]; inbound lines are classified into
//! [`AcpInbound`] by [`parse_inbound_line`]. Nothing in this module is
//! visible to socket clients: the camelCase field names stop here.
//!
//! | Inbound                       | Maps to                              |
//! |-------------------------------|--------------------------------------|
//! | response with `result`/`error`| [`AcpInbound::Response`]             |
//! | `session/update`              | [`AcpInbound::SessionUpdate`]        |
//! | `session/request_permission`  | [`AcpInbound::PermissionRequest`]    |
//! | permission with bad params    | [`AcpInbound::InvalidRequest`]       |
//! | any other request             | [`AcpInbound::UnsupportedRequest`]   |
//! | any other notification        | skipped, logged at `DEBUG`           |

use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{AppError, Result};

/// ACP protocol version announced in `initialize`.
pub const PROTOCOL_VERSION: u64 = 1;

/// Client name announced in `initialize`.
pub const CLIENT_NAME: &str = "acp-bridge";

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC "invalid params" error code.
pub const INVALID_PARAMS: i64 = -32602;

const SESSION_NOT_FOUND: &str = "Session not found";

// ── Outbound ──────────────────────────────────────────────────────────────────

/// A request the bridge sends to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcpRequest {
    /// Protocol handshake; must be the first request on a fresh process.
    Initialize,
    /// Create a session rooted at `cwd`.
    NewSession {
        /// Working directory reported to the agent.
        cwd: String,
    },
    /// Switch the session to another mode (agent).
    SetMode {
        /// Target session.
        session_id: String,
        /// Mode identifier.
        mode_id: String,
    },
    /// Run one prompt turn.
    Prompt {
        /// Target session.
        session_id: String,
        /// Prompt text, sent as a single text block.
        text: String,
    },
}

impl AcpRequest {
    /// Build a `session/new` request for `cwd`.
    #[must_use]
    pub fn new_session(cwd: &Path) -> Self {
        Self::NewSession {
            cwd: cwd.to_string_lossy().into_owned(),
        }
    }

    /// JSON-RPC method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::NewSession { .. } => "session/new",
            Self::SetMode { .. } => "session/set_mode",
            Self::Prompt { .. } => "session/prompt",
        }
    }

    fn params(&self) -> Value {
        match self {
            Self::Initialize => json!({
                "protocolVersion": PROTOCOL_VERSION,
                "clientCapabilities": {
                    "fs": { "readTextFile": false, "writeTextFile": false },
                    "terminal": false
                },
                "clientInfo": {
                    "name": CLIENT_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
            Self::NewSession { cwd } => json!({ "cwd": cwd, "mcpServers": [] }),
            Self::SetMode {
                session_id,
                mode_id,
            } => json!({ "sessionId": session_id, "modeId": mode_id }),
            Self::Prompt { session_id, text } => json!({
                "sessionId": session_id,
                "prompt": [{ "type": "text", "text": text }]
            }),
        }
    }

    /// Serialise into a JSON-RPC request envelope with correlation `id`.
    #[must_use]
    pub fn to_envelope(&self, id: u64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": self.method(),
            "params": self.params(),
        })
    }
}

/// `session/cancel` notification for `session_id`.
#[must_use]
pub fn cancel_notification(session_id: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "session/cancel",
        "params": { "sessionId": session_id }
    })
}

/// Answer to a `session/request_permission` request.
///
/// `Some(option_id)` selects that option; `None` reports the request as
/// cancelled.
#[must_use]
pub fn permission_response(id: &Value, option_id: Option<&str>) -> Value {
    let outcome = match option_id {
        Some(option_id) => json!({ "outcome": "selected", "optionId": option_id }),
        None => json!({ "outcome": "cancelled" }),
    };
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "outcome": outcome }
    })
}

/// JSON-RPC error answer for an agent request the bridge does not serve.
#[must_use]
pub fn method_not_found(id: &Value, method: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

/// JSON-RPC error answer for an agent request whose params could not be read.
#[must_use]
pub fn invalid_params(id: &Value, method: &str, reason: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": INVALID_PARAMS,
            "message": format!("Invalid params for {method}: {reason}")
        }
    })
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// JSON-RPC error object returned by the agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcError {
    /// Whether the agent reports that the addressed session does not exist.
    #[must_use]
    pub fn is_session_not_found(&self) -> bool {
        if self.message.contains(SESSION_NOT_FOUND) {
            return true;
        }
        let Some(Value::Object(data)) = self.data.as_ref() else {
            return false;
        };
        ["details", "message"]
            .iter()
            .filter_map(|key| data.get(*key).and_then(Value::as_str))
            .any(|text| text.contains(SESSION_NOT_FOUND))
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Why the agent ended a prompt turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Normal completion.
    EndTurn,
    /// Refusal: either the session is gone or a genuine policy refusal.
    Refusal,
    /// The turn was cancelled via `session/cancel`.
    Cancelled,
    /// Any other reason (`max_tokens`, `max_turn_requests`, …).
    Other(String),
}

impl StopReason {
    /// Read `stopReason` from a `session/prompt` result.
    #[must_use]
    pub fn from_result(result: &Value) -> Self {
        match result.get("stopReason").and_then(Value::as_str) {
            Some("end_turn") | None => Self::EndTurn,
            Some("refusal") => Self::Refusal,
            Some("cancelled") => Self::Cancelled,
            Some(other) => Self::Other(other.to_owned()),
        }
    }
}

/// One option offered in a permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOption {
    /// Identifier echoed back in the answer.
    pub option_id: String,
    /// Display name.
    pub name: String,
    /// Option kind (`allow_once`, `allow_always`, `reject_once`, `reject_always`).
    pub kind: Option<String>,
}

/// A tool-permission question raised by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    /// JSON-RPC id to answer.
    pub id: Value,
    /// Session the question belongs to.
    pub session_id: String,
    /// Tool call title.
    pub title: String,
    /// Offered choices.
    pub options: Vec<PermissionOption>,
}

/// Payload of a `session/update` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Streamed assistant text.
    AgentMessageChunk {
        /// Text content.
        text: String,
    },
    /// A tool call started.
    ToolCallStart {
        /// Display title.
        title: String,
    },
    /// A running tool call changed.
    ToolCallUpdate {
        /// Display title.
        title: String,
    },
    /// Any other update kind; never relayed.
    Other {
        /// The `sessionUpdate` discriminant.
        kind: String,
    },
}

/// A classified message from the agent's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum AcpInbound {
    /// Answer to one of the bridge's requests.
    Response {
        /// Correlation id, when it is one the bridge could have issued.
        id: Option<u64>,
        /// `result` or `error`.
        outcome: std::result::Result<Value, RpcError>,
    },
    /// Streamed session event.
    SessionUpdate {
        /// Session the event belongs to.
        session_id: String,
        /// Event payload.
        update: SessionUpdate,
    },
    /// Tool-permission question.
    PermissionRequest(PermissionRequest),
    /// Agent request the bridge does not serve (e.g. `fs/read_text_file`).
    UnsupportedRequest {
        /// JSON-RPC id to answer.
        id: Value,
        /// Requested method.
        method: String,
    },
    /// Agent request for a served method whose params are unreadable.
    ///
    /// Still owed an answer, or the agent waits on it forever.
    InvalidRequest {
        /// JSON-RPC id to answer.
        id: Value,
        /// Requested method.
        method: String,
        /// Why the params were rejected.
        reason: String,
    },
    /// The agent's stdout closed or failed.
    Closed {
        /// Human-readable reason.
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    session_id: String,
    update: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionParams {
    session_id: String,
    #[serde(default)]
    tool_call: Value,
    #[serde(default)]
    options: Vec<RawOption>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOption {
    option_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

/// Parse a single NDJSON line from the agent into an [`AcpInbound`].
///
/// - `Ok(Some(message))`: the line is a recognised message.
/// - `Ok(None)`: the line is blank or an unknown notification.
///
/// # Errors
///
/// - [`AppError::Acp`]`("malformed json: …")`: not valid JSON.
/// - [`AppError::Acp`]`("invalid params: …")`: a known method whose
///   params do not match its schema.
/// - [`AppError::Acp`]`("invalid envelope …")`: neither a request,
///   notification, nor response.
pub fn parse_inbound_line(line: &str) -> Result<Option<AcpInbound>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope =
        serde_json::from_str(line).map_err(|e| AppError::Acp(format!("malformed json: {e}")))?;

    match (envelope.method.as_deref(), envelope.id) {
        (Some("session/update"), _) => parse_session_update(envelope.params).map(Some),
        (Some(method @ "session/request_permission"), Some(id)) => {
            match parse_permission_request(id.clone(), envelope.params) {
                Ok(question) => Ok(Some(question)),
                Err(err) => Ok(Some(AcpInbound::InvalidRequest {
                    id,
                    method: method.to_owned(),
                    reason: err.to_string(),
                })),
            }
        }
        (Some(method), Some(id)) => Ok(Some(AcpInbound::UnsupportedRequest {
            id,
            method: method.to_owned(),
        })),
        (Some(method), None) => {
            debug!(method, "acp: skipping unknown notification");
            Ok(None)
        }
        (None, Some(id)) => {
            let outcome = match (envelope.error, envelope.result) {
                (Some(error), _) => Err(error),
                (None, Some(result)) => Ok(result),
                (None, None) => Ok(Value::Null),
            };
            Ok(Some(AcpInbound::Response {
                id: id.as_u64(),
                outcome,
            }))
        }
        (None, None) => Err(AppError::Acp(
            "invalid envelope: neither method nor id present".into(),
        )),
    }
}

fn parse_session_update(params: Value) -> Result<AcpInbound> {
    let params: UpdateParams = serde_json::from_value(params)
        .map_err(|e| AppError::Acp(format!("invalid params: session/update: {e}")))?;

    let kind = params
        .update
        .get("sessionUpdate")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let update = match kind {
        "agent_message_chunk" => SessionUpdate::AgentMessageChunk {
            text: params
                .update
                .pointer("/content/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        },
        "tool_call" | "tool_call_start" => SessionUpdate::ToolCallStart {
            title: tool_title(&params.update),
        },
        "tool_call_update" => SessionUpdate::ToolCallUpdate {
            title: tool_title(&params.update),
        },
        other => SessionUpdate::Other {
            kind: other.to_owned(),
        },
    };

    Ok(AcpInbound::SessionUpdate {
        session_id: params.session_id,
        update,
    })
}

fn parse_permission_request(id: Value, params: Value) -> Result<AcpInbound> {
    let params: PermissionParams = serde_json::from_value(params).map_err(|e| {
        AppError::Acp(format!("invalid params: session/request_permission: {e}"))
    })?;

    let title = params
        .tool_call
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or("tool execution")
        .to_owned();

    let options = params
        .options
        .into_iter()
        .map(|raw| PermissionOption {
            name: raw.name.unwrap_or_else(|| raw.option_id.clone()),
            option_id: raw.option_id,
            kind: raw.kind,
        })
        .collect();

    Ok(AcpInbound::PermissionRequest(PermissionRequest {
        id,
        session_id: params.session_id,
        title,
        options,
    }))
}

fn tool_title(update: &Value) -> String {
    update
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .or_else(|| update.get("toolCallId").and_then(Value::as_str))
        .unwrap_or("tool call")
        .to_owned()
}
