//! The shared session locator.
//!
//! A locator is a URL whose `p` (or `peer`) query parameter names the
//! participants to join:
//!
//! ```text
//! https://mesh.example/space            → initiator, nobody to join
//! https://mesh.example/space?p=host1    → joiner, dial host1
//! https://mesh.example/space?peer=a,b   → joiner, dial a and b
//! ```
//!
//! The first `p`/`peer` parameter in query order wins; later ones are
//! ignored.

use std::fmt;

use driftmesh_protocol::PeerId;
use tokio::sync::watch;
use url::Url;

use crate::SessionError;

const PARAM_NAMES: [&str; 2] = ["p", "peer"];

/// Whether this participant starts a session or joins one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No peer named in the locator. Publishes its own id once open.
    Initiator,
    /// Dials the peers named in the locator.
    Joiner,
}

/// A parsed session locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    url: Url,
    targets: Vec<PeerId>,
}

impl Locator {
    /// Parses a locator URL.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidLocator`] if `raw` is not a URL.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let url = Url::parse(raw)?;
        let mut targets: Vec<PeerId> = Vec::new();
        let value = url
            .query_pairs()
            .find(|(key, _)| PARAM_NAMES.contains(&key.as_ref()))
            .map(|(_, value)| value.into_owned());
        for entry in value.iter().flat_map(|value| value.split(',')) {
            let entry = entry.trim();
            if entry.is_empty() || targets.iter().any(|t| t.as_str() == entry) {
                continue;
            }
            targets.push(PeerId::from(entry));
        }
        Ok(Self { url, targets })
    }

    /// Distinct peers named by the locator, in order of appearance.
    pub fn targets(&self) -> &[PeerId] {
        &self.targets
    }

    pub fn role(&self) -> Role {
        if self.targets.is_empty() {
            Role::Initiator
        } else {
            Role::Joiner
        }
    }

    /// The locator later joiners should use to reach `id`: the same URL
    /// with any `p`/`peer` parameters replaced by `p=<id>`.
    pub fn pointing_at(&self, id: &PeerId) -> Locator {
        let mut url = self.url.clone();
        let kept: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(key, _)| !PARAM_NAMES.contains(&key.as_ref()))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.extend_pairs(kept);
            query.append_pair("p", id.as_str());
        }
        Locator {
            url,
            targets: vec![id.clone()],
        }
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

// ---------------------------------------------------------------------------
// LocatorSink
// ---------------------------------------------------------------------------

/// Where an initiator publishes its rewritten locator (an address bar, a
/// share dialog, a log line).
pub trait LocatorSink: Send + 'static {
    /// Makes `locator` visible to whoever shares the session.
    ///
    /// # Errors
    /// Returns [`SessionError::PublishFailed`] if nobody can see it.
    fn publish(&mut self, locator: &Locator) -> Result<(), SessionError>;
}

impl LocatorSink for watch::Sender<String> {
    fn publish(&mut self, locator: &Locator) -> Result<(), SessionError> {
        self.send(locator.to_string())
            .map_err(|_| SessionError::PublishFailed("no locator observers".to_string()))
    }
}
