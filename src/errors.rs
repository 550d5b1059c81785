//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all bridge failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// ACP framing, serialization, or JSON-RPC failure on the subprocess stream.
    Acp(String),
    /// Local socket listener or connection failure.
    Ipc(String),
    /// Malformed message received from a socket client.
    Protocol(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The agent subprocess could not be started or failed its handshake.
    Spawn(String),
    /// The agent subprocess exited or closed its stdio during a request.
    SubprocessUnavailable(String),
    /// The subprocess reported that the requested session does not exist.
    SessionLost(String),
    /// The subprocess refused the prompt and recovery was already spent.
    Refused(String),
    /// The client went away while a permission decision was pending.
    PermissionAbandoned(String),
    /// Another prompt is already in flight on this instance.
    Busy,
}

impl AppError {
    /// Text sent to socket clients in an `error` message.
    ///
    /// Internal distinctions stay in the logs; the wire only carries a
    /// human-readable sentence.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Busy => "ACP service busy; try again later.".to_owned(),
            Self::SubprocessUnavailable(_) => {
                "ACP agent process is unavailable; the request was not completed.".to_owned()
            }
            Self::Refused(session_id) => format!("ACP prompt refused for session {session_id}"),
            Self::Protocol(msg) => format!("invalid message: {msg}"),
            other => format!("ACP service error: {other}"),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::SubprocessUnavailable(msg) => write!(f, "subprocess unavailable: {msg}"),
            Self::SessionLost(msg) => write!(f, "session lost: {msg}"),
            Self::Refused(msg) => write!(f, "refused: {msg}"),
            Self::PermissionAbandoned(msg) => write!(f, "permission abandoned: {msg}"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
