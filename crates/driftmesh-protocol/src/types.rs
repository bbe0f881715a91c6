//! Message types carried over links.
//!
//! Every link frame is one [`Message`]. On the wire it is an adjacently
//! tagged JSON object:
//!
//! ```json
//! { "type": "PositionUpdate", "data": { "id": "host1", "position": {"x":0,"y":1,"z":2}, "rotation": 0.5 } }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use driftmesh_transport::PeerId;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// A position in the shared space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// `false` if any component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A participant's color, as a packed `0xRRGGBB` value.
///
/// Assigned once when the participant starts and never renegotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    /// Packs three channels into a color.
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self(u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0 & 0x00ff_ffff)
    }
}

// ---------------------------------------------------------------------------
// Recipient: who should receive a message?
// ---------------------------------------------------------------------------

/// Where the mesh should deliver an outbound message.
///
/// The replicator and the join protocol return `(Recipient, Message)`
/// pairs; the mesh resolves each recipient against its current links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Every open link.
    All,

    /// The open link to one participant.
    Peer(PeerId),

    /// Every open link except the one to this participant. Used for
    /// flood relaying.
    AllExcept(PeerId),
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A participant's full presence record, as sent in `PresenceAnnounce`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: PeerId,
    pub username: String,
    pub color: Color,
    pub position: Vec3,
    /// Yaw angle in radians. Older peers omit it.
    #[serde(default)]
    pub rotation: f32,
}

/// A participant moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub id: PeerId,
    pub position: Vec3,
    pub rotation: f32,
}

/// A shared canvas artifact changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactUpdate {
    #[serde(rename = "artifactId")]
    pub artifact_id: String,
    /// Encoded image, e.g. `data:image/png;base64,...`.
    pub payload: String,
}

/// Empty body of a roster request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RosterRequest {}

/// Asks the receiver to introduce itself to `target_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayIntroduction {
    #[serde(rename = "targetId")]
    pub target_id: PeerId,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Everything one participant can say to another over a link.
///
/// `#[serde(tag = "type", content = "data")]` produces the adjacently
/// tagged `{ "type": "...", "data": { ... } }` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    /// "This is who I am." Creates or updates the sender's participant.
    PresenceAnnounce(ParticipantRecord),

    /// "I moved." Updates an existing participant only.
    PositionUpdate(PositionUpdate),

    /// "This artifact now looks like this." Last writer wins.
    ArtifactUpdate(ArtifactUpdate),

    /// Joiner → existing participant: "Tell me who you are and introduce
    /// me to everyone you know."
    RequestRoster(RosterRequest),

    /// Existing → existing: "Go say hello to `target_id`."
    RelayIntroduction(RelayIntroduction),
}

impl Message {
    /// The wire `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PresenceAnnounce(_) => "PresenceAnnounce",
            Self::PositionUpdate(_) => "PositionUpdate",
            Self::ArtifactUpdate(_) => "ArtifactUpdate",
            Self::RequestRoster(_) => "RequestRoster",
            Self::RelayIntroduction(_) => "RelayIntroduction",
        }
    }

    /// Shorthand for an empty roster request.
    pub fn request_roster() -> Self {
        Self::RequestRoster(RosterRequest {})
    }

    /// Checks the rules serde cannot express.
    ///
    /// # Errors
    /// Returns `ProtocolError::Malformed` naming the first broken rule.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let malformed = |what: &str| {
            Err(ProtocolError::Malformed(format!("{}: {what}", self.kind())))
        };
        match self {
            Self::PresenceAnnounce(record) => {
                if record.id.is_empty() {
                    return malformed("empty id");
                }
                if !record.position.is_finite() || !record.rotation.is_finite() {
                    return malformed("non-finite pose");
                }
            }
            Self::PositionUpdate(update) => {
                if update.id.is_empty() {
                    return malformed("empty id");
                }
                if !update.position.is_finite() || !update.rotation.is_finite() {
                    return malformed("non-finite pose");
                }
            }
            Self::ArtifactUpdate(update) => {
                if update.artifact_id.is_empty() {
                    return malformed("empty artifactId");
                }
                if update.payload.is_empty() {
                    return malformed("empty payload");
                }
            }
            Self::RequestRoster(_) => {}
            Self::RelayIntroduction(intro) => {
                if intro.target_id.is_empty() {
                    return malformed("empty targetId");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ParticipantRecord {
        ParticipantRecord {
            id: PeerId::from(id),
            username: "ada".into(),
            color: Color(0x336699),
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: 0.0,
        }
    }

    #[test]
    fn test_presence_announce_json_format() {
        let msg = Message::PresenceAnnounce(record("host1"));
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "PresenceAnnounce");
        assert_eq!(json["data"]["id"], "host1");
        assert_eq!(json["data"]["color"], 0x336699);
        assert_eq!(json["data"]["position"]["y"], 2.0);
    }

    #[test]
    fn test_artifact_update_uses_camel_case_id() {
        let msg = Message::ArtifactUpdate(ArtifactUpdate {
            artifact_id: "wall-3".into(),
            payload: "data:image/png;base64,AA==".into(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""artifactId":"wall-3""#));
    }

    #[test]
    fn test_request_roster_has_empty_data_object() {
        let json = serde_json::to_string(&Message::request_roster()).unwrap();
        assert_eq!(json, r#"{"type":"RequestRoster","data":{}}"#);
    }

    #[test]
    fn test_relay_introduction_uses_target_id() {
        let msg = Message::RelayIntroduction(RelayIntroduction {
            target_id: PeerId::from("join1"),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"RelayIntroduction","data":{"targetId":"join1"}}"#
        );
    }

    #[test]
    fn test_presence_announce_rotation_defaults_when_missing() {
        let json = r#"{"type":"PresenceAnnounce","data":{"id":"a","username":"u","color":1,"position":{"x":0,"y":0,"z":0}}}"#;
        let Message::PresenceAnnounce(record) = serde_json::from_str(json).unwrap() else {
            panic!("expected presence");
        };
        assert_eq!(record.rotation, 0.0);
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let msg = Message::PresenceAnnounce(record(""));
        assert!(matches!(msg.validate(), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_validate_rejects_nan_position() {
        let msg = Message::PositionUpdate(PositionUpdate {
            id: PeerId::from("a"),
            position: Vec3::new(f32::NAN, 0.0, 0.0),
            rotation: 0.0,
        });
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_well_formed_messages() {
        assert!(Message::PresenceAnnounce(record("a")).validate().is_ok());
        assert!(Message::request_roster().validate().is_ok());
    }

    #[test]
    fn test_color_display_is_hex() {
        assert_eq!(Color::from_rgb(0x12, 0xab, 0x03).to_string(), "#12ab03");
    }
}
