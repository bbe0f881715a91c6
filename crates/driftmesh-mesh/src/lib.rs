//! Mesh management for driftmesh.
//!
//! Keeps one link per remote participant, runs the join protocol, and
//! replicates presence and shared artifacts across the mesh.
//!
//! # Key types
//!
//! - [`Mesh`]: link bookkeeping, join protocol, message routing
//! - [`Replicator`]: applies presence and artifact updates
//! - [`Roster`]: the participant set
//! - [`ArtifactStore`]: last-writer-wins artifact cache with expiry
//! - [`MeshConfig`]: rate limits, retention, rejoin interval

mod artifacts;
mod config;
mod error;
mod mesh;
mod replicator;
mod roster;

pub use artifacts::{ArtifactPayload, ArtifactStore};
pub use config::MeshConfig;
pub use error::MeshError;
pub use mesh::{LinkRole, Mesh, MeshEvent, MeshStats};
pub use replicator::{Applied, Outbound, Replicator};
pub use roster::{Roster, Upsert};
