//! Connection - one task per WebSocket.
//!
//! A unified select loop drives three concerns: inbound frames (decoded and
//! dispatched), the socket's outbound queue (the only path that writes to
//! the wire, preserving per-socket order), and the termination signal the
//! registry fires for unhealthy sockets. Cleanup runs exactly once on every
//! exit path.

use crate::dispatch;
use crate::services::session;
use crate::state::{Hub, SocketHandle, SocketState};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use nexus_proto::ClientEvent;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Run one socket to completion.
#[instrument(skip(socket, hub), fields(socket = %socket_id), name = "connection")]
pub async fn run(socket: WebSocket, socket_id: String, hub: Arc<Hub>) {
    let (handle, mut outgoing_rx) = SocketHandle::new(socket_id.clone());
    hub.rooms.register_socket(handle.clone());
    crate::metrics::CONNECTED_SOCKETS.inc();
    info!("socket connected");

    let (mut sink, mut stream) = socket.split();
    let mut state = SocketState::default();
    let mut closing = false;

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(raw))) => {
                        let event = match serde_json::from_str::<ClientEvent>(&raw) {
                            Ok(event) => event,
                            Err(e) => {
                                debug!(error = %e, "undecodable frame");
                                let err = crate::error::AppError::Validation(
                                    "malformed event frame".into(),
                                );
                                hub.rooms.emit_to_socket(&socket_id, &err.to_event());
                                continue;
                            }
                        };
                        let outcome = dispatch::dispatch(&hub, &socket_id, &mut state, event).await;
                        if outcome.close {
                            // Flush whatever is queued (the terminal error
                            // frame included), then drop the socket.
                            closing = true;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary: ignored
                    Some(Err(e)) => {
                        warn!(error = %e, "read error");
                        break;
                    }
                }
            }

            outbound = outgoing_rx.recv() => {
                match outbound {
                    Some(event) => {
                        let frame = match serde_json::to_string(&*event) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "unserializable event");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(frame.into())).await {
                            warn!(error = %e, "write error");
                            break;
                        }
                        if closing && outgoing_rx.is_empty() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            () = handle.terminated() => {
                debug!("socket terminated by registry");
                break;
            }
        }

        if closing && outgoing_rx.is_empty() {
            break;
        }
    }

    session::handle_disconnect(&hub, &socket_id, &state).await;
    crate::metrics::CONNECTED_SOCKETS.dec();
    info!("socket closed");
}
