//! Websocket Session Gateway
//!
//! One socket per user. The handshake token names the identity; presence is
//! registered for the lifetime of the socket and the full online set is
//! re-broadcast on every register and unregister. Per connection the state
//! machine is connect → registered → disconnected, with disconnect handling
//! idempotent via the guarded unregister.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::AppState;
use crate::error::Error;
use crate::fanout::ServerEvent;
use crate::presence::ConnectionHandle;

/// Outbound queue depth per connection; events past this are dropped rather
/// than letting a stalled socket block the router.
const OUTBOUND_BUFFER: usize = 64;
const PING_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: String,
}

/// Client→server events arriving on the socket.
#[derive(Debug, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
enum ClientEvent {
    Typing { to: String, is_typing: bool },
}

/// GET /ws?token=...
///
/// The handshake is authenticated before the upgrade completes; a bad token
/// rejects the connection outright.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let user = match state.auth.validate_session(&params.token).await {
        Ok(user) => user,
        Err(_) => {
            warn!("Rejected websocket handshake with invalid token");
            return Error::Unauthorized("invalid handshake token".to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user.id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

    let handle = ConnectionHandle::new(tx);
    let connection_id = handle.id().to_string();

    info!("User {} connected ({})", user_id, connection_id);
    state.presence.register(&user_id, handle).await;
    touch_last_seen(&state, &user_id);
    state.fanout.broadcast_online().await;

    // Forward queued events to the socket, with keepalive pings.
    let forward_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let payload = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(WsMessage::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_sender.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(incoming) = ws_receiver.next().await {
        match incoming {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::Typing { to, is_typing }) => {
                    // Relayed unmodified; the sender identity comes from the
                    // session, never from the payload.
                    state
                        .fanout
                        .deliver_to_user(
                            &to,
                            ServerEvent::Typing {
                                from: user_id.clone(),
                                is_typing,
                            },
                        )
                        .await;
                }
                Err(e) => debug!("Ignoring malformed client event: {}", e),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Websocket error for {}: {}", user_id, e);
                break;
            }
        }
    }

    // Guarded: if a reconnect superseded this socket, its entry stays.
    state.presence.unregister(&user_id, &connection_id).await;
    touch_last_seen(&state, &user_id);
    state.fanout.broadcast_online().await;
    forward_task.abort();

    info!("User {} disconnected ({})", user_id, connection_id);
}

/// Last-seen updates are fire-and-forget; a failure is logged and never
/// delays the presence broadcast.
fn touch_last_seen(state: &AppState, user_id: &str) {
    let auth = state.auth.clone();
    let user_id = user_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = auth.touch_last_seen(&user_id).await {
            warn!("Last-seen update failed for {}: {}", user_id, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_typing_event_parses() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"typing","data":{"to":"bob","isTyping":true}}"#)
                .unwrap();
        let ClientEvent::Typing { to, is_typing } = event;
        assert_eq!(to, "bob");
        assert!(is_typing);
    }
}
