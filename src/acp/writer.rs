//! ACP writer task.
//!
//! Receives outbound JSON messages from a tokio [`mpsc`] channel, serialises
//! each value to a single-line JSON string, and writes the NDJSON line to the
//! agent's stdin.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// ACP writer task: serialises outbound JSON messages and writes to `stdin`.
///
/// The task exits cleanly when `cancel` fires or when every sender of
/// `msg_rx` has been dropped. Each message is flushed before the next one is
/// taken so that a request is never held back behind buffering.
///
/// # Errors
///
/// - [`AppError::Acp`]`("failed to serialise outbound message: …")`.
/// - [`AppError::Acp`]`("write failed: …")` if the agent's stdin is gone
///   (e.g. the process exited).
pub async fn run_writer<W>(
    generation: u64,
    stdin: W,
    mut msg_rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stdin = stdin;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "acp writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!(generation, "acp writer: message channel closed, stopping");
                    break;
                };

                let mut bytes = serde_json::to_vec(&value).map_err(|e| {
                    AppError::Acp(format!("failed to serialise outbound message: {e}"))
                })?;
                bytes.push(b'\n');

                let written = async {
                    stdin.write_all(&bytes).await?;
                    stdin.flush().await
                }
                .await;

                written.map_err(|e| {
                    warn!(generation, error = %e, "acp writer: write to stdin failed");
                    AppError::Acp(format!("write failed: {e}"))
                })?;
            }
        }
    }

    Ok(())
}
