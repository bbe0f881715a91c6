//! # driftmesh
//!
//! Peer mesh connection manager.
//!
//! Participants find each other through a shared locator, keep one direct
//! link to every other participant, and replicate presence and shared
//! canvas artifacts across the mesh. A supervisor keeps the underlying
//! transport session alive through reconnects and a fallback profile.
//!
//! ## Layers
//!
//! - `driftmesh-transport`: the session provider contract, an in-memory
//!   network, and a WebSocket relay
//! - `driftmesh-protocol`: the `{ type, data }` link messages
//! - `driftmesh-session`: identity, locator, rendezvous, link supervisor
//! - `driftmesh-mesh`: join protocol, routing, presence and artifacts
//! - `driftmesh-tick`: health-check cadence and rate limiting
//!
//! This crate ties them together into a [`Session`] and runs it in a
//! Tokio task behind a [`PeerHandle`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use driftmesh::prelude::*;
//!
//! # async fn run() -> Result<(), DriftmeshError> {
//! driftmesh::init_tracing();
//! let network = MemoryNetwork::new();
//! let host = PeerBuilder::new().username("host").spawn_memory(&network)?;
//! host.set_pose(Vec3::new(1.0, 0.0, 2.0), 0.0).await?;
//! println!("{:?}", host.snapshot().await?.status);
//! host.shutdown().await
//! # }
//! ```

mod config;
mod diagnostics;
mod error;
mod participant;
mod peer;

pub use config::{PeerConfig, DEFAULT_LOCATOR};
pub use diagnostics::{Counters, Diagnostics, LogEntry, Snapshot};
pub use error::DriftmeshError;
pub use peer::{PeerBuilder, PeerHandle};
pub use participant::Session;

pub use driftmesh_mesh as mesh;
pub use driftmesh_protocol as protocol;
pub use driftmesh_session as session;
pub use driftmesh_tick as tick;
pub use driftmesh_transport as transport;

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub mod prelude {
    pub use crate::{DriftmeshError, PeerBuilder, PeerConfig, PeerHandle, Session, Snapshot};
    pub use driftmesh_mesh::{ArtifactPayload, MeshConfig};
    pub use driftmesh_protocol::{Color, ParticipantRecord, PeerId, Vec3};
    pub use driftmesh_session::{ConnectionStatus, LocalIdentity, Locator, SupervisorConfig};
    pub use driftmesh_transport::{MemoryNetwork, RelayEndpoint, TransportProfile};
}
