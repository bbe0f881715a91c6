use crate::LinkId;

/// Errors that can occur in the transport layer.
///
/// These are returned synchronously from [`Transport`](crate::Transport)
/// calls. Failures that happen later (a peer that turns out to be
/// unreachable, a dropped signaling connection) arrive as
/// [`TransportEvent`](crate::TransportEvent)s instead.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The operation needs an open session but none is open.
    #[error("transport session is not open")]
    NotOpen,

    /// The link is not held by this transport (never existed, or closed).
    #[error("unknown link {0}")]
    UnknownLink(LinkId),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Binding a listener failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The provider needs a Tokio runtime and was called outside one.
    #[error("no async runtime available")]
    NoRuntime,

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
