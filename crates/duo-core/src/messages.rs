//! Room protocol envelopes.
//!
//! Inbound messages are free-form JSON objects carrying at least a `room_id`;
//! the server never interprets the rest. Outbound messages share one envelope
//! shape tagged by `status`.

use crate::error::DuoError;
use serde::{Deserialize, Serialize};

/// Maximum number of players seated in one room.
pub const MAX_PLAYERS: usize = 2;

/// Default listen host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8765;

/// Outbound status tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
    RoomCreated,
    RoomJoined,
    RoomFull,
    PlayerJoined,
    PlayerLeft,
    DataReceived,
    DataTransfer,
}

// ── Envelope ──────────────────────────────────────────────────────────

/// Envelope for every message the server sends to a participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerMessage {
    pub status: Status,
    pub message: String,
    pub data: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_player: Option<u8>,
}

/// Status-specific `data` payloads (untagged; the `status` field tells them apart).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    RoomCreated(RoomCreatedPayload),
    RoomJoined(RoomJoinedPayload),
    RoomFull(RoomFullPayload),
    Membership(MembershipPayload),
    DataReceived(DataReceivedPayload),
    /// The sender's original message, forwarded verbatim.
    Relay(serde_json::Value),
}

// ── Individual payload structs ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomCreatedPayload {
    pub room_id: String,
    pub player_number: u8,
    pub current_players_count: usize,
    pub max_players: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomJoinedPayload {
    pub room_id: String,
    pub player_number: u8,
    pub current_players_count: usize,
    pub max_players: usize,
    pub players: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomFullPayload {
    pub room_id: String,
    pub current_players_count: usize,
    pub max_players: usize,
}

/// Shared by `player_joined` and `player_left`: `player_number` is the player
/// who arrived or departed, `players` the seats occupied afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipPayload {
    pub room_id: String,
    pub player_number: u8,
    pub current_players_count: usize,
    pub players: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataReceivedPayload {
    pub room_id: String,
    pub recipients_count: usize,
    pub current_players_count: usize,
}

// ── Constructors ──────────────────────────────────────────────────────

impl ServerMessage {
    fn new(status: Status, message: String, data: Option<Payload>) -> Self {
        Self {
            status,
            message,
            data,
            from_player: None,
        }
    }

    /// Generic acknowledgement.
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Status::Success, message.into(), None)
    }

    /// Per-message failure; `data` is always null.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, message.into(), None)
    }

    /// `error` reply describing a per-message failure.
    pub fn from_error(err: &DuoError) -> Self {
        let message = match err {
            DuoError::Decode(_) => "Invalid data format. Please provide correct JSON".to_string(),
            DuoError::MissingField(field) => format!("Missing required parameter: {field}"),
            DuoError::InvalidField { field, reason } => format!("Invalid parameter {field}: {reason}"),
            DuoError::AlreadyInRoom(room_id) => {
                format!("Already in room {room_id}. Disconnect before joining another room")
            }
            other => other.to_string(),
        };
        Self::error(message)
    }

    pub fn room_created(room_id: &str, player_number: u8) -> Self {
        Self::new(
            Status::RoomCreated,
            format!("Room {room_id} has been created. You are player {player_number}"),
            Some(Payload::RoomCreated(RoomCreatedPayload {
                room_id: room_id.to_string(),
                player_number,
                current_players_count: 1,
                max_players: MAX_PLAYERS,
            })),
        )
    }

    pub fn room_joined(room_id: &str, player_number: u8, players: Vec<u8>) -> Self {
        Self::new(
            Status::RoomJoined,
            format!("You have joined room {room_id}. You are player {player_number}"),
            Some(Payload::RoomJoined(RoomJoinedPayload {
                room_id: room_id.to_string(),
                player_number,
                current_players_count: players.len(),
                max_players: MAX_PLAYERS,
                players,
            })),
        )
    }

    pub fn room_full(room_id: &str, current_players_count: usize) -> Self {
        Self::new(
            Status::RoomFull,
            "Room is full. Cannot join".to_string(),
            Some(Payload::RoomFull(RoomFullPayload {
                room_id: room_id.to_string(),
                current_players_count,
                max_players: MAX_PLAYERS,
            })),
        )
    }

    pub fn player_joined(room_id: &str, player_number: u8, players: Vec<u8>) -> Self {
        Self::new(
            Status::PlayerJoined,
            format!("Player {player_number} has joined the room"),
            Some(Payload::Membership(MembershipPayload {
                room_id: room_id.to_string(),
                player_number,
                current_players_count: players.len(),
                players,
            })),
        )
    }

    pub fn player_left(room_id: &str, player_number: u8, players: Vec<u8>) -> Self {
        Self::new(
            Status::PlayerLeft,
            format!("Player {player_number} has left room {room_id}"),
            Some(Payload::Membership(MembershipPayload {
                room_id: room_id.to_string(),
                player_number,
                current_players_count: players.len(),
                players,
            })),
        )
    }

    pub fn data_received(
        room_id: &str,
        recipients_count: usize,
        current_players_count: usize,
    ) -> Self {
        Self::new(
            Status::DataReceived,
            "Data received and forwarded".to_string(),
            Some(Payload::DataReceived(DataReceivedPayload {
                room_id: room_id.to_string(),
                recipients_count,
                current_players_count,
            })),
        )
    }

    /// Wrap a sender's original message for delivery to the other seat.
    pub fn data_transfer(from_player: u8, original: serde_json::Value) -> Self {
        Self {
            status: Status::DataTransfer,
            message: "Received data from another player".to_string(),
            data: Some(Payload::Relay(original)),
            from_player: Some(from_player),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_tags_are_snake_case() {
        let tag = serde_json::to_value(Status::DataTransfer).unwrap();
        assert_eq!(tag, json!("data_transfer"));
        let tag = serde_json::to_value(Status::RoomCreated).unwrap();
        assert_eq!(tag, json!("room_created"));
    }

    #[test]
    fn error_has_null_data_and_no_sender() {
        let value = serde_json::to_value(ServerMessage::error("bad")).unwrap();
        assert_eq!(value, json!({"status": "error", "message": "bad", "data": null}));
    }

    #[test]
    fn error_messages_name_the_problem() {
        let msg = ServerMessage::from_error(&DuoError::MissingField("room_id"));
        assert_eq!(msg.status, Status::Error);
        assert_eq!(msg.message, "Missing required parameter: room_id");

        let msg = ServerMessage::from_error(&DuoError::Decode("eof".into()));
        assert_eq!(msg.message, "Invalid data format. Please provide correct JSON");
        assert!(msg.data.is_none());
    }

    #[test]
    fn success_is_a_bare_acknowledgement() {
        let value = serde_json::to_value(ServerMessage::success("ok")).unwrap();
        assert_eq!(value, json!({"status": "success", "message": "ok", "data": null}));
    }

    #[test]
    fn room_joined_counts_players() {
        let value = serde_json::to_value(ServerMessage::room_joined("r1", 2, vec![1, 2])).unwrap();
        assert_eq!(value["status"], "room_joined");
        assert_eq!(value["data"]["player_number"], 2);
        assert_eq!(value["data"]["current_players_count"], 2);
        assert_eq!(value["data"]["max_players"], 2);
        assert_eq!(value["data"]["players"], json!([1, 2]));
    }

    #[test]
    fn player_left_reports_remaining_seats() {
        let value = serde_json::to_value(ServerMessage::player_left("r1", 2, vec![1])).unwrap();
        assert_eq!(value["status"], "player_left");
        assert_eq!(value["message"], "Player 2 has left room r1");
        assert_eq!(value["data"]["current_players_count"], 1);
        assert_eq!(value["data"]["players"], json!([1]));
        assert!(value["data"].get("max_players").is_none());
    }

    #[test]
    fn data_transfer_carries_original_payload() {
        let original = json!({"room_id": "r1", "move": "x"});
        let value = serde_json::to_value(ServerMessage::data_transfer(1, original.clone())).unwrap();
        assert_eq!(value["status"], "data_transfer");
        assert_eq!(value["from_player"], 1);
        assert_eq!(value["data"], original);
    }
}
