//! Error types for the mesh layer.

use driftmesh_protocol::{PeerId, ProtocolError};
use driftmesh_transport::TransportError;

/// Errors that can occur while routing and applying link messages.
///
/// None of these ever tear anything down. The mesh logs them, counts
/// them, and drops the offending message.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// The frame could not be decoded or failed validation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A link operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A participant record or position arrived over a link owned by a
    /// different participant.
    #[error("message about {claimed} arrived on the link to {link_peer}")]
    OriginMismatch { claimed: PeerId, link_peer: PeerId },

    /// An artifact payload is not a base64 data URL.
    #[error("invalid artifact payload: {0}")]
    InvalidArtifact(String),

    /// An artifact payload exceeds the configured size bound.
    #[error("artifact payload is {len} bytes, limit is {max}")]
    ArtifactTooLarge { len: usize, max: usize },
}
