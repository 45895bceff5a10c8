//! WebSocket handler — connection lifecycle around a session.
//!
//! DESIGN
//! ======
//! On upgrade, the credential is verified and the connection admitted to
//! the project's session. The connection then splits into two halves:
//! - Reader: decodes inbound frames and enqueues commands on the
//!   session's inbound queue. Decode failures reply with an Error frame
//!   and enqueue nothing.
//! - Writer: the sole consumer of this connection's outbound queue;
//!   frames reach the transport in queue order.
//!
//! Both halves also watch the connection's close signal. Replacement,
//! slow-peer eviction and project teardown raise it instead of pushing a
//! frame, so a full outbound queue cannot delay or swallow the close.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → verify `access_token` → `Hub::admit`
//! 2. Reader enqueues commands; session worker acks and fans out
//! 3. Reader ends (close, error, or overflow) → `Hub::disconnect`
//! 4. Writer drains the remaining queue, then closes the transport
//!
//! A rejected connection is upgraded and then closed with a
//! policy-violation close frame, so browser clients can read the reason.

use std::collections::HashMap;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{ServerEvent, decode_client_frame};
use crate::session::{CloseReason, SessionCommand};
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.get("access_token").cloned();

    ws.on_upgrade(move |socket| async move {
        let Some(token) = token else {
            info!(%project_id, "ws: missing access_token");
            return close_policy(socket).await;
        };
        let identity = match state.verifier.verify(&token) {
            Ok(identity) => identity,
            Err(e) => {
                info!(%project_id, error = %e, "ws: rejected credential");
                return close_policy(socket).await;
            }
        };
        run_ws(socket, state, project_id, identity).await;
    })
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(socket: WebSocket, state: AppState, project_id: Uuid, identity: crate::auth::Identity) {
    let client_id = identity.user_id;

    let (outbound_tx, outbound_rx) =
        mpsc::channel::<ServerEvent>(state.config.outbound_queue_depth);
    let (close_tx, close_rx) = watch::channel(None);
    let admission = match state
        .hub
        .admit(project_id, identity, outbound_tx.clone(), close_tx)
        .await
    {
        Ok(admission) => admission,
        Err(e) => {
            info!(%project_id, %client_id, error = %e, "ws: admission rejected");
            drop(outbound_tx);
            return close_policy(socket).await;
        }
    };
    info!(%project_id, %client_id, "ws: client connected");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, outbound_rx, close_rx.clone()));

    read_inbound(
        stream,
        project_id,
        client_id,
        admission.inbound,
        outbound_tx,
        close_rx,
    )
    .await;

    // Reader is done: detach from the session. Peers learn of the
    // departure through the session's command order. Removing the client
    // handle drops its queue and close senders, so the writer drains what
    // is queued and closes the transport.
    state.hub.disconnect(project_id, client_id, admission.conn_id).await;
    let _ = writer.await;
    info!(%project_id, %client_id, "ws: client disconnected");
}

/// Decode inbound frames and enqueue them for the session worker.
/// Returns when the transport closes, errors, the close signal fires, or
/// this client overruns the inbound queue.
async fn read_inbound(
    mut stream: SplitStream<WebSocket>,
    project_id: Uuid,
    client_id: Uuid,
    inbound: mpsc::Sender<SessionCommand>,
    outbound: mpsc::Sender<ServerEvent>,
    mut close_rx: watch::Receiver<Option<CloseReason>>,
) {
    loop {
        let msg = tokio::select! {
            // Server-initiated close (replacement, eviction, teardown) or
            // the handle was dropped: stop reading so the connection can
            // shut down.
            _ = close_rx.changed() => break,
            msg = stream.next() => msg,
        };
        let Some(msg) = msg else { break };
        let Ok(msg) = msg else { break };
        match msg {
            Message::Text(text) => match decode_client_frame(&text) {
                Ok(event) => {
                    match inbound.try_send(SessionCommand::Client { client_id, event }) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            // This client is producing faster than the
                            // project can commit.
                            warn!(%project_id, %client_id, "ws: inbound queue full, disconnecting");
                            break;
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                Err(e) => {
                    warn!(%project_id, %client_id, error = %e, "ws: bad inbound frame");
                    let _ = outbound.try_send(ServerEvent::Error { message: e.to_string() });
                }
            },
            Message::Close(_) => break,
            // Ping/pong is answered by the library; binary is ignored.
            _ => {}
        }
    }
}

/// Drain the outbound queue onto the transport. When the close signal
/// fires the close frame goes out immediately, ahead of anything still
/// queued. A handle dropped without a reason (normal disconnect) drains
/// the residue and closes normally.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerEvent>,
    mut close_rx: watch::Receiver<Option<CloseReason>>,
) {
    loop {
        tokio::select! {
            changed = close_rx.changed() => match changed {
                Ok(()) => {
                    let reason = *close_rx.borrow_and_update();
                    if let Some(reason) = reason {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: close_reason_code(reason),
                                reason: Utf8Bytes::from_static(reason.as_str()),
                            })))
                            .await;
                        return;
                    }
                }
                Err(_) => break,
            },
            item = rx.recv() => match item {
                Some(event) => {
                    if send_frame(&mut sink, &event).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
        }
    }
    while let Ok(event) = rx.try_recv() {
        if send_frame(&mut sink, &event).await.is_err() {
            return;
        }
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::default(),
        })))
        .await;
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}

fn close_reason_code(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::Replaced => close_code::NORMAL,
        CloseReason::PolicyViolation => close_code::POLICY,
    }
}

/// Close an upgraded socket that never became live.
async fn close_policy(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: Utf8Bytes::from_static(CloseReason::PolicyViolation.as_str()),
        })))
        .await;
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
