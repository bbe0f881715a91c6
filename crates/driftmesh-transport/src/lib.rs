//! Transport abstraction layer for driftmesh.
//!
//! The mesh never touches sockets. It drives a [`Transport`]: a session
//! provider that opens a signaling session, dials other participants by
//! identifier, and reports everything that happens as [`TransportEvent`]s
//! pushed into an [`EventSink`].
//!
//! Every [`Transport`] method is synchronous and non-blocking. Completion
//! (a session opening, a link opening, a frame arriving) is observed
//! through events, never by waiting on the call.
//!
//! # Providers
//!
//! - [`MemoryNetwork`]: in-process provider with fault injection, used by
//!   tests and local demos
//! - [`RelayTransport`] / [`RelayServer`]: WebSocket rendezvous relay
//!
//! # Feature Flags
//!
//! - `websocket` (default): relay provider and relay server via `tokio-tungstenite`

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod relay;

pub use error::TransportError;
pub use memory::{MemoryNetwork, MemoryTransport};
#[cfg(feature = "websocket")]
pub use relay::{RelayServer, RelayTransport};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Counter for generating process-unique link IDs.
static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque identifier for one end of a link.
///
/// Link IDs are unique within the process, across every transport
/// instance and every session epoch, so a late event for a link that was
/// torn down can never be mistaken for a newer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    /// Creates a new `LinkId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates a fresh, never-used link ID.
    pub fn fresh() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// A participant identifier, assigned by the session provider.
///
/// Serialized as a plain string.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty identifier, which is never valid on
    /// the wire.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// One NAT-assist relay entry (STUN/TURN or a WebSocket relay URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEndpoint {
    /// Endpoint URL, e.g. `stun:stun.l.google.com:19302` or `ws://relay:9000`.
    pub url: String,
    /// Optional TURN username.
    pub username: Option<String>,
    /// Optional TURN credential.
    pub credential: Option<String>,
}

impl RelayEndpoint {
    /// An endpoint with no credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            credential: None,
        }
    }
}

/// A complete transport configuration the supervisor can open a session
/// with.
///
/// The supervisor holds two of these: the primary profile, and an
/// alternate with a different relay set and no pinned host, used once as
/// a fallback when the primary keeps failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportProfile {
    /// Human-readable name, used in logs and by fault injection.
    pub name: String,
    /// NAT-assist relay endpoints handed to the provider.
    pub relays: Vec<RelayEndpoint>,
    /// A specific signaling host to use, if any.
    pub pinned_host: Option<String>,
}

impl TransportProfile {
    /// An empty profile with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relays: Vec::new(),
            pinned_host: None,
        }
    }

    /// The default primary profile: pinned signaling host plus public STUN.
    pub fn primary() -> Self {
        Self::named("primary")
            .with_pinned_host("ws://127.0.0.1:9000")
            .with_relay(RelayEndpoint::new("stun:stun.l.google.com:19302"))
            .with_relay(RelayEndpoint::new("stun:global.stun.twilio.com:3478"))
    }

    /// The default alternate profile: different relay set, no pinned host.
    pub fn alternate() -> Self {
        Self::named("alternate")
            .with_relay(RelayEndpoint::new("ws://127.0.0.1:9001"))
            .with_relay(RelayEndpoint::new("stun:stun1.l.google.com:19302"))
    }

    /// Adds a relay endpoint.
    pub fn with_relay(mut self, relay: RelayEndpoint) -> Self {
        self.relays.push(relay);
        self
    }

    /// Pins the signaling host.
    pub fn with_pinned_host(mut self, host: impl Into<String>) -> Self {
        self.pinned_host = Some(host.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Session-level failure categories reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// The requested remote participant does not exist (any more).
    /// Only that single attempt is affected.
    PeerUnavailable(PeerId),
    /// The network under the signaling session failed.
    Network(String),
    /// The signaling service reported an error.
    ServerError(String),
    /// Anything else the provider reports.
    Other(String),
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerUnavailable(peer) => write!(f, "peer-unavailable: {peer}"),
            Self::Network(reason) => write!(f, "network: {reason}"),
            Self::ServerError(reason) => write!(f, "server-error: {reason}"),
            Self::Other(reason) => write!(f, "other: {reason}"),
        }
    }
}

/// Everything a provider reports back to its owner.
///
/// Session-level events carry the `epoch` passed to
/// [`Transport::open`]; the owner uses it to ignore events from a session
/// instance it already destroyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The session opened and the provider assigned `id`.
    Open { epoch: u64, id: PeerId },
    /// A remote participant dialed us. The link is not usable until
    /// `LinkOpen` arrives for it.
    Connection { link: LinkId, remote: PeerId },
    /// The link is open and can carry frames.
    LinkOpen { link: LinkId },
    /// A frame arrived on the link.
    Data { link: LinkId, frame: Vec<u8> },
    /// The link closed (either side).
    LinkClosed { link: LinkId },
    /// The link failed.
    LinkError { link: LinkId, reason: String },
    /// The session reported a fault.
    Error { epoch: u64, fault: TransportFault },
    /// The session lost its signaling connection.
    Disconnected { epoch: u64 },
}

/// Where a provider pushes its events.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// The receiving side of an [`EventSink`].
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates a connected sink/stream pair.
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A session provider: opens a signaling session and manages links.
///
/// All methods return immediately. Outcomes are reported through the
/// [`EventSink`] the provider was constructed with.
pub trait Transport: Send + 'static {
    /// Opens a session, asking for `candidate` as the local identifier.
    ///
    /// Reports `Open { epoch, id }` on success (the provider may assign a
    /// different `id`), or `Error { epoch, .. }` on failure. Any session
    /// already open is destroyed first.
    fn open(
        &mut self,
        epoch: u64,
        candidate: &PeerId,
        profile: &TransportProfile,
    ) -> Result<(), TransportError>;

    /// Dials a remote participant and returns the local end of the new
    /// link. The link reports `LinkOpen` once usable, or the session
    /// reports `PeerUnavailable` if the remote does not exist.
    fn connect(&mut self, remote: &PeerId) -> Result<LinkId, TransportError>;

    /// Queues a frame on an open link.
    fn send(&mut self, link: LinkId, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Closes a link. Unknown links are ignored.
    fn close_link(&mut self, link: LinkId);

    /// Destroys the session and every link it holds. Safe to call when
    /// nothing is open.
    fn destroy(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_id_new_and_into_inner() {
        let id = LinkId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_link_id_display() {
        assert_eq!(LinkId::new(7).to_string(), "link-7");
    }

    #[test]
    fn test_link_id_fresh_is_unique() {
        let a = LinkId::fresh();
        let b = LinkId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn test_peer_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&PeerId::new("host1")).unwrap();
        assert_eq!(json, "\"host1\"");
    }

    #[test]
    fn test_peer_id_ordering_is_lexicographic() {
        assert!(PeerId::from("alpha") < PeerId::from("beta"));
    }

    #[test]
    fn test_profiles_differ_in_relays_and_pinning() {
        let primary = TransportProfile::primary();
        let alternate = TransportProfile::alternate();
        assert!(primary.pinned_host.is_some());
        assert!(alternate.pinned_host.is_none());
        assert_ne!(primary.relays, alternate.relays);
    }

    #[test]
    fn test_fault_display_uses_category_names() {
        let fault = TransportFault::PeerUnavailable(PeerId::from("x"));
        assert_eq!(fault.to_string(), "peer-unavailable: x");
        let fault = TransportFault::ServerError("boom".into());
        assert_eq!(fault.to_string(), "server-error: boom");
    }
}
