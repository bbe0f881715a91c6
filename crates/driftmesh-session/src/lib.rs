//! Identity, rendezvous, and link supervision for driftmesh.
//!
//! This crate answers two questions for a participant:
//!
//! 1. **Who am I and whom do I join?** [`LocalIdentity`] produces the
//!    identifier candidate and color; [`Locator`] parses the shared
//!    session locator; [`Rendezvous`] turns the assigned identifier into
//!    connection targets and, for an initiator, publishes the rewritten
//!    locator through a [`LocatorSink`].
//! 2. **Is my transport session alive?** [`LinkSupervisor`] runs the
//!    reconnect ladder (reconnect, fall back to the alternate profile,
//!    give up and wait for the user) and reports a [`ConnectionStatus`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Mesh Layer (above)  ← gets targets on open, drops attempts on peer-unavailable
//!     ↕
//! Session Layer (this crate)  ← owns identity and session lifecycle
//!     ↕
//! Transport Layer (below)  ← opens/destroys sessions on command
//! ```
//!
//! Nothing here touches a clock or a socket. The supervisor is driven
//! with explicit `Instant`s and answers with [`SupervisorCommand`]s, so
//! every transition can be tested without a runtime.

mod error;
mod identity;
mod locator;
mod rendezvous;
mod supervisor;

pub use error::SessionError;
pub use identity::{generate_candidate, random_color, LocalIdentity};
pub use locator::{Locator, LocatorSink, Role};
pub use rendezvous::Rendezvous;
pub use supervisor::{
    ConnectionStatus, DestroyReason, LinkSupervisor, SupervisorCommand,
    SupervisorConfig, SupervisorState, TimerKind,
};
