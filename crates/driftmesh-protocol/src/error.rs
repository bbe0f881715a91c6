//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means a frame could not be turned into a
//! [`Message`](crate::Message) (or back). The mesh logs and drops such
//! frames; they never reach presence or artifact state.

/// Errors that can occur while encoding or decoding link frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a message into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: the frame is not a `{type, data}` envelope,
    /// or `data` does not have the shape its `type` requires.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but violates a message rule (empty identifier,
    /// non-finite coordinate, and so on).
    #[error("malformed message: {0}")]
    Malformed(String),
}
