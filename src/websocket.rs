//! WebSocket upgrade handling and the per-connection message loop.
//!
//! Mirrors the teacher's `websocket::handler`/`websocket::connection` split:
//! one task drains an outbound channel onto the socket, another reads frames
//! off the socket and dispatches them onto [`crate::coordinator::SessionCoordinator`].
//! Where the teacher registered a single inbox per connected player on
//! `EnhancedGameServer`, a connection here may be subscribed to several
//! `game:`/`room:` channels at once, so each `Subscribe` spawns its own
//! forwarder pumping that channel's `Encoded` stream into the connection's
//! one outbound sender; the per-subscriber `Arc`-wrapped pre-encoded JSON
//! idiom from [`crate::broadcast`] carries through unchanged.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::BearerAuth;
use crate::broadcast::Encoded;
use crate::protocol::{ClientIntent, CoreError, ServerEvent, UserId};
use crate::server::GameServer;

/// Caps an individual inbound frame; oversized payloads are rejected rather
/// than parsed, mirroring the teacher's `max_message_size` guard.
const MAX_FRAME_BYTES: usize = 64 * 1024;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(server): State<Arc<GameServer>>,
    auth: BearerAuth,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, server, addr, auth.user_id))
}

/// A live `Subscribe`: the broadcaster subscription id (for `unsubscribe`)
/// and the handle of the task forwarding it onto the connection's outbound
/// channel, so `Unsubscribe`/disconnect can stop it rather than leave it
/// parked on a receiver nothing will ever send to again.
struct ChannelSub {
    sub_id: Uuid,
    forwarder: JoinHandle<()>,
}

async fn handle_socket(socket: WebSocket, server: Arc<GameServer>, addr: SocketAddr, user_id: UserId) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Encoded>();

    let send_task = tokio::spawn(async move {
        while let Some(encoded) = out_rx.recv().await {
            if sink.send(Message::Text(encoded.json.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    tracing::info!(%user_id, client_addr = %addr, "websocket connection established");

    let mut subscriptions: HashMap<String, ChannelSub> = HashMap::new();

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%user_id, error = %err, "websocket receive error");
                break;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
        };

        if text.len() > MAX_FRAME_BYTES {
            tracing::warn!(%user_id, size = text.len(), max = MAX_FRAME_BYTES, "frame exceeds size limit");
            send_local(&out_tx, ServerEvent::Error {
                message: format!("message too large ({} bytes, max {MAX_FRAME_BYTES})", text.len()),
                error_code: crate::protocol::ErrorCode::InvalidArgument,
            });
            continue;
        }

        let intent: ClientIntent = match serde_json::from_str(&text) {
            Ok(intent) => intent,
            Err(err) => {
                send_local(&out_tx, ServerEvent::Error {
                    message: format!("malformed message: {err}"),
                    error_code: crate::protocol::ErrorCode::InvalidArgument,
                });
                continue;
            }
        };

        dispatch(intent, &server, user_id, &out_tx, &mut subscriptions).await;
    }

    for (_, sub) in subscriptions.drain() {
        sub.forwarder.abort();
    }
    send_task.abort();
    tracing::info!(%user_id, client_addr = %addr, "websocket connection closed");
}

/// Sends a connection-local event (never broadcast) straight onto this
/// connection's outbound channel.
fn send_local(out_tx: &mpsc::UnboundedSender<Encoded>, event: ServerEvent) {
    let _ = out_tx.send(Encoded::new(event));
}

fn send_error(out_tx: &mpsc::UnboundedSender<Encoded>, err: &CoreError) {
    send_local(
        out_tx,
        ServerEvent::Error {
            message: err.to_string(),
            error_code: err.code(),
        },
    );
}

async fn dispatch(
    intent: ClientIntent,
    server: &Arc<GameServer>,
    user_id: UserId,
    out_tx: &mpsc::UnboundedSender<Encoded>,
    subscriptions: &mut HashMap<String, ChannelSub>,
) {
    match intent {
        ClientIntent::Subscribe { channel } => {
            if subscriptions.contains_key(&channel) {
                return;
            }
            match server.coordinator().subscribe(&channel, user_id).await {
                Ok(subscription) => {
                    for encoded in subscription.replay {
                        let _ = out_tx.send(encoded);
                    }
                    let forward_tx = out_tx.clone();
                    let mut rx = subscription.rx;
                    let forwarder = tokio::spawn(async move {
                        while let Some(encoded) = rx.recv().await {
                            if forward_tx.send(encoded).is_err() {
                                break;
                            }
                        }
                    });
                    subscriptions.insert(
                        channel.clone(),
                        ChannelSub {
                            sub_id: subscription.id,
                            forwarder,
                        },
                    );
                    send_local(out_tx, ServerEvent::Subscribed { channel });
                }
                Err(err) => send_error(out_tx, &err),
            }
        }

        ClientIntent::Unsubscribe { channel } => {
            if let Some(sub) = subscriptions.remove(&channel) {
                server.coordinator().unsubscribe(&channel, sub.sub_id);
                sub.forwarder.abort();
            }
        }

        ClientIntent::ProposeAction {
            game_id,
            action_text,
            character_id,
        } => {
            if let Err(err) = server
                .coordinator()
                .propose_action(game_id, user_id, &action_text, character_id)
                .await
            {
                send_error(out_tx, &err);
            }
        }

        ClientIntent::MarkContinue { game_id, ready } => {
            if let Err(err) = server.coordinator().mark_continue(game_id, user_id, ready).await {
                send_error(out_tx, &err);
            }
        }

        ClientIntent::PostMessage {
            game_id,
            content,
            kind,
        } => {
            if let Err(err) = server
                .coordinator()
                .post_message(game_id, user_id, &content, kind)
                .await
            {
                send_error(out_tx, &err);
            }
        }

        ClientIntent::LeaveGame { game_id } => {
            if let Err(err) = server.coordinator().leave_game(game_id, user_id).await {
                send_error(out_tx, &err);
            }
        }

        ClientIntent::UpdateSettings { game_id, patch } => {
            let body: crate::protocol::SettingsPatchBody = match serde_json::from_value(patch) {
                Ok(body) => body,
                Err(err) => {
                    send_local(out_tx, ServerEvent::Error {
                        message: format!("malformed settings patch: {err}"),
                        error_code: crate::protocol::ErrorCode::InvalidArgument,
                    });
                    return;
                }
            };
            if let Err(err) = server
                .coordinator()
                .update_settings(game_id, user_id, body.patch, body.max_chapters)
                .await
            {
                send_error(out_tx, &err);
            }
        }

        ClientIntent::Ping => send_local(out_tx, ServerEvent::Pong),
    }
}
