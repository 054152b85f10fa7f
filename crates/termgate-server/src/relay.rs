//! WebSocket-to-SSH relay loop.
//!
//! One relay per attached client. The socket is split; a writer task owns the
//! sink and drains a bounded frame queue, while the relay selects between
//! session output and inbound client frames. When either direction ends, the
//! other is cancelled and the socket is dropped. The relay never tears down
//! the session itself: a client detaching leaves the SSH connection running
//! until an explicit disconnect.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use termgate_core::{decode_inbound, InboundFrame, OutboundFrame};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::SshSession;

const FRAME_QUEUE: usize = 64;

/// Drive one attached client until either side goes away.
pub async fn run(socket: WebSocket, session: Option<Arc<SshSession>>) {
    let session = match session {
        Some(session) if session.is_alive().await => session,
        _ => {
            reject(socket, "Session not found or not connected").await;
            return;
        }
    };

    let mut output = match session.take_output().await {
        Some(output) => output,
        None => {
            warn!(session_id = %session.id(), "second attach rejected");
            reject(socket, "Session already attached").await;
            return;
        }
    };

    debug!(session_id = %session.id(), "client attached");

    let (mut sink, mut stream) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<OutboundFrame>(FRAME_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(_) => continue,
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let forward_tx = frame_tx.clone();
    let mut forward = tokio::spawn(async move {
        while let Some(chunk) = output.recv().await {
            let frame = OutboundFrame::Output {
                data: String::from_utf8_lossy(&chunk).into_owned(),
            };
            if forward_tx.send(frame).await.is_err() {
                break;
            }
        }
        // session output ended; the shell or transport is gone
    });

    let inbound = async {
        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    debug!(session_id = %session.id(), error = %e, "socket read failed");
                    break;
                }
            };
            match message {
                Message::Text(text) => match decode_inbound(text.as_str()) {
                    Ok(Some(InboundFrame::Input { data })) => {
                        if !session.send(data.as_bytes()).await {
                            break;
                        }
                    }
                    Ok(Some(InboundFrame::Resize { cols, rows })) => {
                        if !session.resize(cols, rows).await {
                            debug!(session_id = %session.id(), "resize not applied");
                        }
                    }
                    Ok(Some(InboundFrame::Ping)) => {
                        if frame_tx.send(OutboundFrame::Pong).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {} // well-formed but unrecognized, ignore
                    Err(e) => {
                        debug!(session_id = %session.id(), error = %e, "unreadable frame");
                        break;
                    }
                },
                Message::Close(_) => break,
                // axum answers protocol-level pings itself
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = &mut forward => {}
        _ = inbound => {
            forward.abort();
            let _ = forward.await;
        }
    }

    drop(frame_tx);
    let _ = writer.await;

    debug!(session_id = %session.id(), "client detached");
}

/// Send a single error frame, then close.
async fn reject(mut socket: WebSocket, message: &str) {
    let frame = OutboundFrame::Error {
        message: message.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let _ = socket.close().await;
}
