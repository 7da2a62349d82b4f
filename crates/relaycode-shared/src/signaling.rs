//! JSON wire messages for the signaling/rendezvous protocol.
//!
//! `offer`, `answer`, and `ice-candidate` are structurally identical on both
//! the inbound (client -> server) and outbound (server -> client, relayed)
//! directions, reusing the same `type` discriminant in both directions --
//! intentional, and something implementations must accept on the wire.

use serde::{Deserialize, Serialize};

use crate::types::{ClientId, RoomCode};

/// Messages a client may send to the signaling server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "create-room")]
    CreateRoom,

    #[serde(rename = "join-room")]
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    #[serde(rename = "leave-room")]
    LeaveRoom,

    #[serde(rename = "offer")]
    Offer { sdp: String },

    #[serde(rename = "answer")]
    Answer { sdp: String },

    #[serde(rename = "ice-candidate")]
    IceCandidate {
        candidate: String,
        #[serde(rename = "sdpMid")]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex")]
        sdp_m_line_index: Option<u32>,
    },
}

/// Messages the signaling server sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "clientId")]
        client_id: ClientId,
    },

    #[serde(rename = "room-created")]
    RoomCreated {
        #[serde(rename = "roomId")]
        room_id: RoomCode,
    },

    #[serde(rename = "room-joined")]
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: RoomCode,
        #[serde(rename = "isInitiator")]
        is_initiator: bool,
    },

    #[serde(rename = "peer-joined")]
    PeerJoined,

    #[serde(rename = "peer-left")]
    PeerLeft,

    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },

    #[serde(rename = "offer")]
    Offer { sdp: String },

    #[serde(rename = "answer")]
    Answer { sdp: String },

    #[serde(rename = "ice-candidate")]
    IceCandidate {
        candidate: String,
        #[serde(rename = "sdpMid")]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex")]
        sdp_m_line_index: Option<u32>,
    },
}

/// The full error taxonomy of the signaling protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "ALREADY_IN_ROOM")]
    AlreadyInRoom,
    #[serde(rename = "ROOM_NOT_FOUND")]
    RoomNotFound,
    #[serde(rename = "ROOM_FULL")]
    RoomFull,
    #[serde(rename = "NOT_IN_ROOM")]
    NotInRoom,
    #[serde(rename = "NO_PEER")]
    NoPeer,
    #[serde(rename = "INVALID_JSON")]
    InvalidJson,
    #[serde(rename = "UNKNOWN_MESSAGE")]
    UnknownMessage,
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_round_trips_through_json() {
        let msg = ClientMessage::JoinRoom {
            room_id: "ABC123".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"join-room""#));
        assert!(json.contains(r#""roomId":"ABC123""#));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn offer_shares_type_string_on_both_wires() {
        let client_offer = ClientMessage::Offer {
            sdp: "v=0".to_string(),
        };
        let server_offer = ServerMessage::Offer {
            sdp: "v=0".to_string(),
        };

        let client_json: serde_json::Value =
            serde_json::to_value(&client_offer).unwrap();
        let server_json: serde_json::Value =
            serde_json::to_value(&server_offer).unwrap();

        assert_eq!(client_json["type"], server_json["type"]);
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = r#"{"type":"not-a-real-message"}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }

    #[test]
    fn error_message_serializes_known_code() {
        let msg = ServerMessage::error(ErrorCode::RoomFull, "room is full");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""code":"ROOM_FULL""#));
    }
}
