//! ACP reader task.
//!
//! Reads newline-delimited JSON messages from the agent's stdout, classifies
//! each line with [`parse_inbound_line`], and forwards the results through a
//! tokio [`mpsc`] channel in arrival order.
//!
//! The reader is driven by [`FramedRead`] backed by [`NdjsonCodec`], which
//! enforces the per-line limit before any heap allocation for JSON parsing.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::NdjsonCodec;
use crate::acp::messages::{parse_inbound_line, AcpInbound};
use crate::AppError;

/// ACP reader task: reads NDJSON lines from `stdout` and emits [`AcpInbound`]s.
///
/// On EOF or an unrecoverable I/O error, sends [`AcpInbound::Closed`] before
/// returning. Over-long, malformed, or unrecognised lines are logged and
/// skipped; they do **not** terminate the reader.
///
/// When `cancel` fires the reader exits without emitting `Closed`.
pub async fn run_reader<R>(
    generation: u64,
    stdout: R,
    max_line_bytes: usize,
    event_tx: mpsc::Sender<AcpInbound>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, NdjsonCodec::with_max_length(max_line_bytes));
    // `FramedRead` yields one `None` after a decode error; that one is not EOF.
    let mut resyncing = false;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "acp reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None if resyncing => {
                        resyncing = false;
                        debug!(generation, "acp reader: resuming after framing error");
                    }

                    None => {
                        debug!(generation, "acp reader: EOF detected");
                        send_closed(&event_tx, generation, "agent stdout closed").await;
                        break;
                    }

                    Some(Err(AppError::Acp(ref msg))) => {
                        warn!(
                            generation,
                            error = msg.as_str(),
                            "acp reader: codec framing error, skipping"
                        );
                        resyncing = true;
                    }

                    Some(Err(e)) => {
                        warn!(generation, error = %e, "acp reader: IO error, stopping");
                        send_closed(&event_tx, generation, &format!("stream error: {e}")).await;
                        break;
                    }

                    Some(Ok(line)) => {
                        resyncing = false;
                        match parse_inbound_line(&line) {
                            Ok(Some(message)) => {
                                if event_tx.send(message).await.is_err() {
                                    debug!(generation, "acp reader: event_tx closed, stopping");
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(
                                    generation,
                                    error = %e,
                                    raw_line = %line,
                                    "acp reader: parse error, skipping line"
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn send_closed(event_tx: &mpsc::Sender<AcpInbound>, generation: u64, reason: &str) {
    let event = AcpInbound::Closed {
        reason: reason.to_owned(),
    };
    if event_tx.send(event).await.is_err() {
        debug!(
            generation,
            "acp reader: event_tx closed before Closed could be delivered"
        );
    }
}
