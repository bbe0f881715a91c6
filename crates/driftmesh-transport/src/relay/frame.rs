//! Relay wire frames.
//!
//! Every WebSocket text message between a participant and the relay is one
//! JSON-encoded [`RelayFrame`], discriminated by its `op` field:
//!
//! ```json
//! {"op":"dial","request":7,"to":"host1"}
//! ```

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

use crate::PeerId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum RelayFrame {
    // Participant -> relay
    Register { candidate: PeerId },
    Dial { request: u64, to: PeerId },

    // Relay -> participant
    Registered { id: PeerId },
    Dialed { request: u64, channel: u64 },
    Unavailable { request: u64, to: PeerId },
    Incoming { channel: u64, from: PeerId },
    Fault { message: String },

    // Both directions
    Data { channel: u64, payload: String },
    Close { channel: u64 },
}

impl RelayFrame {
    /// Encodes the frame as a WebSocket text message.
    pub(crate) fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode relay frame");
                None
            }
        }
    }

    /// Decodes a WebSocket message. Non-text and malformed messages yield
    /// `None`.
    pub(crate) fn from_message(msg: &Message) -> Option<Self> {
        let Message::Text(text) = msg else {
            return None;
        };
        match serde_json::from_str(text.as_str()) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed relay frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_uses_snake_case_op_tag() {
        let frame = RelayFrame::Dial {
            request: 7,
            to: PeerId::from("host1"),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"op":"dial","request":7,"to":"host1"}"#);
    }

    #[test]
    fn test_from_message_ignores_binary() {
        let msg = Message::Binary(b"{}".to_vec().into());
        assert!(RelayFrame::from_message(&msg).is_none());
    }

    #[test]
    fn test_from_message_ignores_unknown_op() {
        let msg = Message::Text(r#"{"op":"teleport"}"#.into());
        assert!(RelayFrame::from_message(&msg).is_none());
    }
}
