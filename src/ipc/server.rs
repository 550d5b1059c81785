//! Unix socket server for bridge clients.
//!
//! Listens on `<socket_root>/<instance_name>.sock` using the `interprocess`
//! crate and speaks the line protocol in [`crate::ipc::protocol`].
//!
//! Connections are persistent: after a `done` or `error` the client may
//! send another prompt on the same connection. Each admitted prompt runs in
//! its own task holding the dispatcher permit; the connection task relays
//! that task's messages and forwards `permission_response` lines to it.

use std::path::Path;

use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::acp::codec::NdjsonCodec;
use crate::bridge::dispatcher::Dispatcher;
use crate::bridge::permission::PermissionReply;
use crate::ipc::protocol::{decode_client_line, encode_line, ClientMessage, ServiceMessage};
use crate::{AppError, BridgeConfig, Result};

/// Buffered messages from a running prompt to its connection.
pub const OUTBOUND_CAPACITY: usize = 64;

const REPLY_CAPACITY: usize = 8;

/// Bind the instance socket and spawn the accept loop.
///
/// The socket file is removed when the loop stops.
///
/// # Errors
///
/// - `AppError::Config` if a non-socket file occupies the socket path.
/// - `AppError::Ipc` if the listener cannot be created.
pub fn spawn_server(
    config: &BridgeConfig,
    dispatcher: Dispatcher,
    ct: CancellationToken,
) -> Result<JoinHandle<()>> {
    let path = config.socket_path();
    let max_line_bytes = config.client_line_limit_bytes;
    remove_stale_socket(&path)?;

    let listener_name = path
        .clone()
        .to_fs_name::<GenericFilePath>()
        .map_err(|err| AppError::Ipc(format!("invalid socket path {}: {err}", path.display())))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to bind {}: {err}", path.display())))?;

    info!(socket = %path.display(), "bridge listening");

    let span = info_span!("ipc_server", instance = %config.instance_name);
    let handle = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("socket server shutting down");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok(stream) => {
                            let conn = Uuid::new_v4();
                            let span = info_span!("conn", %conn);
                            tokio::spawn(
                                handle_connection(stream, dispatcher.clone(), max_line_bytes, ct.clone())
                                    .instrument(span),
                            );
                        }
                        Err(err) => warn!(%err, "accept failed"),
                    }
                }
            }

            drop(listener);
            if let Err(err) = std::fs::remove_file(&path) {
                debug!(%err, socket = %path.display(), "socket file already gone");
            }
        }
        .instrument(span),
    );

    Ok(handle)
}

/// Remove a socket file left behind by a previous run.
///
/// # Errors
///
/// Returns `AppError::Config` if the path exists and is not a socket, or
/// `AppError::Io` if it cannot be removed.
pub fn remove_stale_socket(path: &Path) -> Result<()> {
    let Ok(metadata) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if !metadata.file_type().is_socket() {
            return Err(AppError::Config(format!(
                "socket path exists and is not a socket: {}",
                path.display()
            )));
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    std::fs::remove_file(path).map_err(|err| {
        AppError::Io(format!("failed to remove stale socket {}: {err}", path.display()))
    })?;
    info!(socket = %path.display(), "removed stale socket");
    Ok(())
}

/// Serve one client connection until it closes or the server stops.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    dispatcher: Dispatcher,
    max_line_bytes: usize,
    ct: CancellationToken,
) {
    let (reader, writer) = stream.split();
    let mut lines = FramedRead::new(reader, NdjsonCodec::with_max_length(max_line_bytes));
    let mut sink = FramedWrite::new(writer, NdjsonCodec::new());

    let (out_tx, mut out_rx) = mpsc::channel::<ServiceMessage>(OUTBOUND_CAPACITY);
    // Present while this connection owns the in-flight prompt.
    let mut replies: Option<mpsc::Sender<PermissionReply>> = None;

    debug!("client connected");

    loop {
        tokio::select! {
            // Queued output is flushed before a shutdown closes the connection.
            biased;
            Some(message) = out_rx.recv() => {
                if message.is_terminal() {
                    replies = None;
                }
                if write_message(&mut sink, &message).await.is_err() {
                    break;
                }
            }
            () = ct.cancelled() => break,
            line = lines.next() => {
                let line = match line {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(err)) => {
                        warn!(%err, "unreadable client line, closing");
                        let _ = write_message(&mut sink, &ServiceMessage::error(&err)).await;
                        break;
                    }
                };

                let message = match decode_client_line(&line) {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(%err, "malformed client message, closing");
                        let _ = write_message(&mut sink, &ServiceMessage::error(&err)).await;
                        break;
                    }
                };

                let rejection = match message {
                    ClientMessage::Prompt(request) => {
                        if replies.is_some() {
                            Some(AppError::Busy)
                        } else if let Err(err) = request.validate() {
                            Some(err)
                        } else if let Some(permit) = dispatcher.try_admit() {
                            let (reply_tx, reply_rx) = mpsc::channel(REPLY_CAPACITY);
                            replies = Some(reply_tx);
                            let request_id = Uuid::new_v4();
                            info!(
                                %request_id,
                                session_id = request.requested_session().unwrap_or("<new>"),
                                "prompt admitted"
                            );
                            let dispatcher = dispatcher.clone();
                            let out = out_tx.clone();
                            tokio::spawn(
                                async move { dispatcher.run(permit, request, out, reply_rx).await }
                                    .instrument(info_span!("request", %request_id)),
                            );
                            None
                        } else {
                            info!("prompt rejected, another request is in flight");
                            Some(AppError::Busy)
                        }
                    }
                    ClientMessage::PermissionResponse { option_id } => match replies {
                        Some(ref tx) => {
                            if tx.try_send(option_id).is_err() {
                                warn!("permission response dropped, request not listening");
                            }
                            None
                        }
                        None => Some(AppError::Protocol(
                            "permission_response without a pending request".into(),
                        )),
                    },
                };

                if let Some(err) = rejection {
                    if write_message(&mut sink, &ServiceMessage::error(&err)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    debug!(in_flight = replies.is_some(), "client disconnected");
}

async fn write_message<W>(sink: &mut FramedWrite<W, NdjsonCodec>, message: &ServiceMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(message)?;
    sink.send(line).await.map_err(|err| {
        debug!(%err, "client write failed");
        err
    })
}
