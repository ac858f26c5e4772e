//! Signaling connection driver
//!
//! Bridges one WebSocket to one [`Session`](crate::session::Session): text
//! frames are parsed and queued on the session's inbox, outbound messages
//! are written by a separate task, and closing the socket unregisters the
//! session.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit};

use crate::protocol::{InboundMessage, OutboundMessage};
use crate::server::context::ServerContext;

/// Drive a signaling socket until either side closes it
///
/// `_permit` holds the session slot for the connection's lifetime.
pub async fn handle_socket(
    socket: WebSocket,
    ctx: Arc<ServerContext>,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundMessage>();

    let session = match ctx.open_session(out_tx).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Session setup failed, closing socket");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    let id = session.id();
    tracing::debug!(session = %id, "Signaling socket open");

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sink.send(Message::Text(message.to_text())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(session = %id, error = %e, "Socket read error");
                break;
            }
        };

        match frame {
            Message::Text(text) => match InboundMessage::parse(&text) {
                Ok(message) => {
                    tracing::trace!(session = %id, ?message, "Signal received");
                    if !session.deliver(message) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(session = %id, error = %e, "Ignoring signaling message");
                }
            },
            Message::Close(_) => break,
            Message::Binary(payload) => {
                tracing::debug!(session = %id, bytes = payload.len(), "Ignoring binary frame");
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    ctx.close_session(id).await;
    drop(session);
    // Teardown dropped the last sender, so the writer finishes on its own
    if let Err(e) = writer.await {
        tracing::debug!(session = %id, error = %e, "Socket writer ended abnormally");
    }
    tracing::debug!(session = %id, "Signaling socket closed");
}
