//! ACP initialization handshake.
//!
//! A freshly spawned agent must answer `initialize` before it accepts any
//! session request. The bridge announces protocol version
//! [`PROTOCOL_VERSION`](crate::acp::messages::PROTOCOL_VERSION), disables
//! file-system and terminal capabilities, and waits for the matching
//! response. Notifications that arrive before it are skipped.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::acp::link::AcpLink;
use crate::acp::messages::{invalid_params, method_not_found, AcpInbound, AcpRequest};
use crate::{AppError, Result};

/// Perform the `initialize` exchange and return the agent's result object.
///
/// # Errors
///
/// - `AppError::Spawn("handshake timeout …")`: no answer within `timeout`.
/// - `AppError::Spawn("agent exited during handshake …")`: stdout closed.
/// - `AppError::Spawn("initialize rejected …")`: the agent answered with
///   a JSON-RPC error.
pub async fn initialize(link: &mut AcpLink, timeout: Duration) -> Result<Value> {
    tokio::time::timeout(timeout, exchange(link))
        .await
        .map_err(|_| {
            AppError::Spawn(format!(
                "handshake timeout: 'initialize' not answered within {timeout:?}"
            ))
        })?
}

async fn exchange(link: &mut AcpLink) -> Result<Value> {
    let id = link
        .send_request(&AcpRequest::Initialize)
        .await
        .map_err(|e| AppError::Spawn(format!("failed to send initialize: {e}")))?;
    debug!(id, "handshake: initialize sent");

    loop {
        match link.recv().await {
            AcpInbound::Response {
                id: Some(got),
                outcome,
            } if got == id => {
                let result = outcome
                    .map_err(|e| AppError::Spawn(format!("initialize rejected by agent: {e}")))?;
                info!(
                    protocol_version = ?result.get("protocolVersion"),
                    "handshake: agent initialized"
                );
                return Ok(result);
            }
            AcpInbound::Closed { reason } => {
                return Err(AppError::Spawn(format!(
                    "agent exited during handshake: {reason}"
                )));
            }
            AcpInbound::UnsupportedRequest { id, method } => {
                link.send(method_not_found(&id, &method)).await?;
            }
            AcpInbound::InvalidRequest { id, method, reason } => {
                link.send(invalid_params(&id, &method, &reason)).await?;
            }
            other => {
                debug!(?other, "handshake: skipping message before initialize response");
            }
        }
    }
}
