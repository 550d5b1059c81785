//! Request/notification plumbing over a running reader/writer pair.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::acp::messages::{AcpInbound, AcpRequest};
use crate::{AppError, Result};

/// Capacity of the inbound and outbound message channels.
pub const LINK_CAPACITY: usize = 256;

/// Bidirectional message link to one agent process.
///
/// The outbound side feeds the writer task; the inbound side drains the
/// reader task. Request ids are allocated here, monotonically per link.
#[derive(Debug)]
pub struct AcpLink {
    outbound: mpsc::Sender<Value>,
    inbound: mpsc::Receiver<AcpInbound>,
    next_id: u64,
}

impl AcpLink {
    /// Wrap the channel ends connected to the writer and reader tasks.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Value>, inbound: mpsc::Receiver<AcpInbound>) -> Self {
        Self {
            outbound,
            inbound,
            next_id: 1,
        }
    }

    /// Send `request` with a fresh correlation id and return that id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SubprocessUnavailable`] if the writer task is gone.
    pub async fn send_request(&mut self, request: &AcpRequest) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(request.to_envelope(id)).await?;
        Ok(id)
    }

    /// Send a raw JSON-RPC message (response or notification).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SubprocessUnavailable`] if the writer task is gone.
    pub async fn send(&self, message: Value) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| AppError::SubprocessUnavailable("agent stdin writer stopped".into()))
    }

    /// Next inbound message; a dropped reader reads as [`AcpInbound::Closed`].
    pub async fn recv(&mut self) -> AcpInbound {
        self.inbound.recv().await.unwrap_or_else(|| AcpInbound::Closed {
            reason: "agent stdout reader stopped".into(),
        })
    }
}
