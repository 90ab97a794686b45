//! Wire codec for board events.
//!
//! Events are decoded exactly once, at the boundary where they enter the
//! process (log record or inbound command). Decoding normalizes the legacy
//! untyped move payload, `{"card_id", "from_col", "to_col", "new_index"}`, into
//! an explicit [`BoardEvent::MoveCard`]. Encoding always emits the `type`
//! discriminant.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::BoardEvent;

const KNOWN_TYPES: [&str; 4] = ["new_card", "delete_card", "move_card", "health"];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no `type` and is not a move")]
    MissingType,

    #[error("unknown event type `{0}`")]
    UnknownType(String),

    #[error("invalid `{kind}` event: {source}")]
    Invalid {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode one event from raw log/transport bytes.
pub fn decode_event(bytes: &[u8]) -> Result<BoardEvent, DecodeError> {
    decode_event_str(std::str::from_utf8(bytes)?)
}

pub fn decode_event_str(text: &str) -> Result<BoardEvent, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;
    decode_event_value(value)
}

pub fn decode_event_value(mut value: Value) -> Result<BoardEvent, DecodeError> {
    let obj = value.as_object_mut().ok_or(DecodeError::NotAnObject)?;

    let tagged = match obj.get("type") {
        Some(Value::String(kind)) => Some(kind.clone()),
        Some(_) => return Err(DecodeError::MissingType),
        None => None,
    };
    let kind = match tagged {
        Some(kind) => kind,
        None if obj.contains_key("from_col") => {
            obj.insert("type".into(), Value::String("move_card".into()));
            "move_card".to_string()
        }
        None => return Err(DecodeError::MissingType),
    };

    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|source| DecodeError::Invalid { kind, source })
}

/// Canonical JSON text of any outbound message.
pub fn encode<T: Serialize>(message: &T) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HealthStatus;

    #[test]
    fn decodes_new_card_with_passthrough_to_col() {
        let ev = decode_event_str(
            r#"{"type":"new_card","card_id":"card-1","content":"Tacos / #ORD-1234","to_col":"order"}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            BoardEvent::NewCard {
                card_id: "card-1".into(),
                content: "Tacos / #ORD-1234".into(),
                to_col: Some("order".into()),
            }
        );
    }

    #[test]
    fn legacy_untyped_move_is_normalized() {
        let ev = decode_event(
            br#"{"card_id":"c2","from_col":"order","to_col":"invoice","new_index":0}"#,
        )
        .unwrap();
        assert_eq!(ev.kind(), "move_card");

        let encoded = encode(&ev).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "move_card");
        assert_eq!(value["to_col"], "invoice");
    }

    #[test]
    fn decodes_health() {
        let ev = decode_event_str(r#"{"type":"health","status":"healthy"}"#).unwrap();
        assert_eq!(ev, BoardEvent::health(HealthStatus::Healthy));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode_event(b"not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_event(&[0xff, 0xfe]),
            Err(DecodeError::Utf8(_))
        ));
        assert!(matches!(
            decode_event_str("[1,2]"),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn rejects_missing_or_unknown_type() {
        assert!(matches!(
            decode_event_str(r#"{"card_id":"c1"}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            decode_event_str(r#"{"type":7}"#),
            Err(DecodeError::MissingType)
        ));
        match decode_event_str(r#"{"type":"sync_state","data":{}}"#) {
            Err(DecodeError::UnknownType(kind)) => assert_eq!(kind, "sync_state"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_fields() {
        match decode_event_str(r#"{"type":"delete_card"}"#) {
            Err(DecodeError::Invalid { kind, .. }) => assert_eq!(kind, "delete_card"),
            other => panic!("expected Invalid, got {other:?}"),
        }
        assert!(matches!(
            decode_event_str(r#"{"type":"move_card","card_id":"c","from_col":"a","to_col":"b"}"#),
            Err(DecodeError::Invalid { .. })
        ));
    }

    #[test]
    fn negative_index_is_accepted_as_is() {
        let ev = decode_event_str(
            r#"{"type":"move_card","card_id":"c","from_col":"a","to_col":"b","new_index":-1}"#,
        )
        .unwrap();
        assert!(matches!(ev, BoardEvent::MoveCard { new_index: -1, .. }));
        assert!(encode(&ev).unwrap().contains(r#""new_index":-1"#));
    }

    #[test]
    fn unknown_health_status_is_invalid() {
        assert!(matches!(
            decode_event_str(r#"{"type":"health","status":"meh"}"#),
            Err(DecodeError::Invalid { .. })
        ));
    }
}
