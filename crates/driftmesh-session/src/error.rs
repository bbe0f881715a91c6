//! Error types for the session layer.

/// Errors that can occur while resolving identity and rendezvous.
///
/// Supervisor failures are not errors: a degraded transport session is
/// handled by the reconnect ladder and surfaces as a
/// [`ConnectionStatus`](crate::ConnectionStatus), never as a `Result`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session locator is not a valid URL.
    #[error("invalid session locator: {0}")]
    InvalidLocator(#[from] url::ParseError),

    /// Publishing the rewritten locator failed.
    ///
    /// Callers log this and carry on; later joiners can still use a
    /// locator shared by other means.
    #[error("failed to publish session locator: {0}")]
    PublishFailed(String),
}
