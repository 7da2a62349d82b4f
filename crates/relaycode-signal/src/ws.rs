//! Per-connection WebSocket actor: upgrades a connection, assigns a client
//! id, and runs a `tokio::select!` loop relaying frames in both directions
//! until the transport closes.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use relaycode_shared::signaling::{ClientMessage, ErrorCode, ServerMessage};
use relaycode_shared::types::ClientId;

use crate::rooms::Registry;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<Registry>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, registry))
}

async fn handle_socket(mut socket: WebSocket, registry: Arc<Registry>) {
    let client_id = ClientId::new();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    registry.register_client(client_id, outbound_tx.clone());

    if send(&mut socket, &ServerMessage::Connected { client_id })
        .await
        .is_err()
    {
        registry.disconnect(client_id);
        return;
    }

    loop {
        tokio::select! {
            Some(msg) = outbound_rx.recv() => {
                if send(&mut socket, &msg).await.is_err() {
                    break;
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_frame(&registry, client_id, &text, &outbound_tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(client = %client_id, error = %e, "websocket error");
                        break;
                    }
                    _ => continue,
                }
            }
        }
    }

    registry.disconnect(client_id);
    debug!(client = %client_id, "connection closed");
}

async fn handle_text_frame(
    registry: &Registry,
    client_id: ClientId,
    text: &str,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            let _ = outbound_tx.send(ServerMessage::error(
                ErrorCode::InvalidJson,
                "malformed JSON frame",
            ));
            return;
        }
    };

    const KNOWN_TYPES: &[&str] = &[
        "create-room",
        "join-room",
        "leave-room",
        "offer",
        "answer",
        "ice-candidate",
    ];
    let type_field = value.get("type").and_then(|t| t.as_str());
    if !matches!(type_field, Some(t) if KNOWN_TYPES.contains(&t)) {
        let _ = outbound_tx.send(ServerMessage::error(
            ErrorCode::UnknownMessage,
            "unrecognized message type",
        ));
        return;
    }

    let message: ClientMessage = match serde_json::from_value(value) {
        Ok(m) => m,
        Err(_) => {
            let _ = outbound_tx.send(ServerMessage::error(
                ErrorCode::InvalidJson,
                "malformed JSON frame",
            ));
            return;
        }
    };

    match message {
        ClientMessage::CreateRoom => match registry.create_room(client_id) {
            Ok(room_id) => {
                let _ = outbound_tx.send(ServerMessage::RoomCreated { room_id });
            }
            Err(code) => {
                let _ = outbound_tx.send(ServerMessage::error(code, describe(code)));
            }
        },

        ClientMessage::JoinRoom { room_id } => match registry.join_room(client_id, &room_id) {
            Ok(normalized) => {
                let _ = outbound_tx.send(ServerMessage::RoomJoined {
                    room_id: normalized,
                    is_initiator: false,
                });
            }
            Err(code) => {
                let _ = outbound_tx.send(ServerMessage::error(code, describe(code)));
            }
        },

        ClientMessage::LeaveRoom => {
            registry.leave_room(client_id);
        }

        ClientMessage::Offer { sdp } => {
            relay(registry, client_id, outbound_tx, ServerMessage::Offer { sdp });
        }

        ClientMessage::Answer { sdp } => {
            relay(registry, client_id, outbound_tx, ServerMessage::Answer { sdp });
        }

        ClientMessage::IceCandidate {
            candidate,
            sdp_mid,
            sdp_m_line_index,
        } => {
            relay(
                registry,
                client_id,
                outbound_tx,
                ServerMessage::IceCandidate {
                    candidate,
                    sdp_mid,
                    sdp_m_line_index,
                },
            );
        }
    }
}

fn relay(
    registry: &Registry,
    client_id: ClientId,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
    message: ServerMessage,
) {
    if let Err(code) = registry.relay_to_peer(client_id, message) {
        let _ = outbound_tx.send(ServerMessage::error(code, describe(code)));
    }
}

fn describe(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::AlreadyInRoom => "client is already in a room",
        ErrorCode::RoomNotFound => "no room exists with that code",
        ErrorCode::RoomFull => "room already has two members",
        ErrorCode::NotInRoom => "client is not in a room",
        ErrorCode::NoPeer => "no peer is present in the room",
        ErrorCode::InvalidJson => "malformed JSON frame",
        ErrorCode::UnknownMessage => "unrecognized message type",
    }
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("ServerMessage is always serializable");
    socket.send(Message::Text(text.into())).await
}
