//! The `{ type, data }` link envelope.
//!
//! Encoding is plain serde. Decoding is done in two steps so that an
//! unrecognized `type` can be told apart from a recognized one with a bad
//! body: the first is ignored, the second is an error.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::{Codec, Message, ProtocolError, RosterRequest};

/// The result of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A recognized, validated message.
    Message(Message),
    /// A well-formed envelope with a `type` this version does not know.
    Unknown(String),
}

/// The envelope before its body is interpreted.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Encodes a message into a link frame.
///
/// # Errors
/// Returns `ProtocolError::Encode` if serialization fails.
pub fn encode_message<C: Codec>(codec: &C, message: &Message) -> Result<Vec<u8>, ProtocolError> {
    codec.encode(message)
}

/// Decodes and validates a link frame.
///
/// # Errors
/// - `ProtocolError::Decode` if the frame is not an envelope, or the body
///   of a known `type` has the wrong shape.
/// - `ProtocolError::Malformed` if the body parses but breaks a rule.
pub fn decode_frame<C: Codec>(codec: &C, frame: &[u8]) -> Result<Inbound, ProtocolError> {
    let raw: RawEnvelope = codec.decode(frame)?;
    let message = match raw.kind.as_str() {
        "PresenceAnnounce" => Message::PresenceAnnounce(body(raw.data)?),
        "PositionUpdate" => Message::PositionUpdate(body(raw.data)?),
        "ArtifactUpdate" => Message::ArtifactUpdate(body(raw.data)?),
        // The roster request carries nothing; ignore whatever came along.
        "RequestRoster" => Message::RequestRoster(RosterRequest {}),
        "RelayIntroduction" => Message::RelayIntroduction(body(raw.data)?),
        _ => return Ok(Inbound::Unknown(raw.kind)),
    };
    message.validate()?;
    Ok(Inbound::Message(message))
}

fn body<T: DeserializeOwned>(data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Color, JsonCodec, ParticipantRecord, PeerId, PositionUpdate, Vec3};

    #[test]
    fn test_decode_frame_known_kind_returns_message() {
        let msg = Message::PositionUpdate(PositionUpdate {
            id: PeerId::from("a"),
            position: Vec3::new(1.0, 0.0, -1.0),
            rotation: 1.5,
        });
        let frame = encode_message(&JsonCodec, &msg).unwrap();
        assert_eq!(decode_frame(&JsonCodec, &frame).unwrap(), Inbound::Message(msg));
    }

    #[test]
    fn test_decode_frame_unknown_kind_is_passed_through() {
        let frame = br#"{"type":"Emote","data":{"id":"a","emote":"wave"}}"#;
        assert_eq!(
            decode_frame(&JsonCodec, frame).unwrap(),
            Inbound::Unknown("Emote".into())
        );
    }

    #[test]
    fn test_decode_frame_missing_field_is_decode_error() {
        let frame = br#"{"type":"PositionUpdate","data":{"id":"a","rotation":0}}"#;
        assert!(matches!(
            decode_frame(&JsonCodec, frame),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_frame_without_type_is_decode_error() {
        assert!(matches!(
            decode_frame(&JsonCodec, br#"{"data":{}}"#),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_frame_request_roster_without_data() {
        assert_eq!(
            decode_frame(&JsonCodec, br#"{"type":"RequestRoster"}"#).unwrap(),
            Inbound::Message(Message::request_roster())
        );
    }

    #[test]
    fn test_decode_frame_invalid_record_is_malformed() {
        let msg = Message::PresenceAnnounce(ParticipantRecord {
            id: PeerId::from(""),
            username: "u".into(),
            color: Color(0),
            position: Vec3::ZERO,
            rotation: 0.0,
        });
        let frame = encode_message(&JsonCodec, &msg).unwrap();
        assert!(matches!(
            decode_frame(&JsonCodec, &frame),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
