//! JSON text codec for the room protocol.
//!
//! Inbound frames are decoded into an untyped [`serde_json::Value`] so that
//! relay payloads pass through untouched; only `room_id` is inspected.

use crate::error::{DuoError, DuoResult};
use crate::messages::ServerMessage;
use serde_json::Value;

/// Name of the only field the server reads from an inbound message.
pub const ROOM_ID_FIELD: &str = "room_id";

/// Decode a text or binary frame into a JSON value.
pub fn decode_message(data: &[u8]) -> DuoResult<Value> {
    let value: Value = serde_json::from_slice(data)?;
    Ok(value)
}

/// Extract the room identifier from a decoded inbound message.
///
/// The message must be an object with a string `room_id` member.
pub fn room_id_of(value: &Value) -> DuoResult<String> {
    let field = value
        .as_object()
        .and_then(|obj| obj.get(ROOM_ID_FIELD))
        .ok_or(DuoError::MissingField(ROOM_ID_FIELD))?;

    match field {
        Value::String(id) => Ok(id.clone()),
        other => Err(DuoError::InvalidField {
            field: ROOM_ID_FIELD,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

/// Encode an outbound envelope as JSON text.
pub fn encode_message(msg: &ServerMessage) -> DuoResult<String> {
    serde_json::to_string(msg).map_err(|e| DuoError::Other(format!("encode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_text_json() {
        let value = decode_message(br#"{"room_id":"r1","move":"x"}"#).unwrap();
        assert_eq!(value, json!({"room_id": "r1", "move": "x"}));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode_message(b"{not json").unwrap_err();
        assert!(matches!(err, DuoError::Decode(_)));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = decode_message(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, DuoError::Decode(_)));
    }

    #[test]
    fn room_id_required() {
        let err = room_id_of(&json!({"move": "x"})).unwrap_err();
        assert!(matches!(err, DuoError::MissingField("room_id")));
        assert_eq!(err.to_string(), "missing required parameter: room_id");
    }

    #[test]
    fn non_object_has_no_room_id() {
        let err = room_id_of(&json!(["room_id"])).unwrap_err();
        assert!(matches!(err, DuoError::MissingField(_)));
        let err = room_id_of(&json!("r1")).unwrap_err();
        assert!(matches!(err, DuoError::MissingField(_)));
    }

    #[test]
    fn room_id_must_be_string() {
        let err = room_id_of(&json!({"room_id": 7})).unwrap_err();
        assert!(matches!(err, DuoError::InvalidField { field: "room_id", .. }));
        assert!(err.is_per_message());
    }

    #[test]
    fn encodes_envelope() {
        let text = encode_message(&ServerMessage::room_created("r1", 1)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["status"], "room_created");
        assert_eq!(value["data"]["room_id"], "r1");
        assert_eq!(value["data"]["player_number"], 1);
        assert_eq!(value["data"]["current_players_count"], 1);
        assert!(value.get("from_player").is_none());
    }
}
