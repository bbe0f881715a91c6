//! Unified error type for driftmesh.

use driftmesh_mesh::MeshError;
use driftmesh_protocol::ProtocolError;
use driftmesh_session::SessionError;
use driftmesh_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum DriftmeshError {
    /// A transport-level error (open, connect, send).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, malformed message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (locator, publish).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A mesh-level error (bad artifact, origin mismatch).
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// The peer actor has stopped.
    #[error("peer is no longer running")]
    Stopped,
}
