//! Turning an assigned identifier into connection targets.

use driftmesh_protocol::PeerId;

use crate::{Locator, LocatorSink, Role};

/// Decides the session role and the peers to dial.
///
/// `on_open` may run many times over a session's life (every supervisor
/// restart reopens the transport). It always answers with the full target
/// list; the mesh ignores targets it is already linked to.
#[derive(Debug, Clone)]
pub struct Rendezvous {
    locator: Locator,
    local_id: Option<PeerId>,
    published: Option<Locator>,
}

impl Rendezvous {
    pub fn new(locator: Locator) -> Self {
        Self {
            locator,
            local_id: None,
            published: None,
        }
    }

    pub fn role(&self) -> Role {
        self.locator.role()
    }

    /// The locator this participant was started with.
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// The locator last published for later joiners, if any.
    pub fn published(&self) -> Option<&Locator> {
        self.published.as_ref()
    }

    /// Handles the transport session opening with identifier `id`.
    ///
    /// An initiator publishes `?p=<id>` (once per distinct id; publish
    /// failures are only logged). Returns the locator targets minus `id`
    /// itself, which can appear when a stale locator names this
    /// participant.
    pub fn on_open(&mut self, id: &PeerId, sink: Option<&mut dyn LocatorSink>) -> Vec<PeerId> {
        self.local_id = Some(id.clone());

        if self.role() == Role::Initiator {
            let rewritten = self.locator.pointing_at(id);
            if self.published.as_ref() != Some(&rewritten) {
                match sink.map(|sink| sink.publish(&rewritten)) {
                    Some(Err(e)) => tracing::warn!(error = %e, "locator publish failed"),
                    Some(Ok(())) => tracing::info!(locator = %rewritten, "session locator published"),
                    None => tracing::debug!(locator = %rewritten, "no locator sink configured"),
                }
                self.published = Some(rewritten);
            }
        }

        self.targets()
    }

    /// Locator targets other than the local identifier.
    pub fn targets(&self) -> Vec<PeerId> {
        self.locator
            .targets()
            .iter()
            .filter(|target| Some(*target) != self.local_id.as_ref())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionError;

    #[derive(Default)]
    struct Recorder {
        published: Vec<String>,
        fail: bool,
    }

    impl LocatorSink for Recorder {
        fn publish(&mut self, locator: &Locator) -> Result<(), SessionError> {
            if self.fail {
                return Err(SessionError::PublishFailed("read-only".into()));
            }
            self.published.push(locator.to_string());
            Ok(())
        }
    }

    fn rendezvous(raw: &str) -> Rendezvous {
        Rendezvous::new(Locator::parse(raw).unwrap())
    }

    #[test]
    fn test_on_open_initiator_publishes_own_id() {
        let mut rv = rendezvous("https://mesh.example/");
        let mut sink = Recorder::default();

        let targets = rv.on_open(&PeerId::from("host1"), Some(&mut sink));

        assert!(targets.is_empty());
        assert_eq!(sink.published, vec!["https://mesh.example/?p=host1"]);
    }

    #[test]
    fn test_on_open_twice_with_same_id_publishes_once() {
        let mut rv = rendezvous("https://mesh.example/");
        let mut sink = Recorder::default();

        rv.on_open(&PeerId::from("host1"), Some(&mut sink));
        rv.on_open(&PeerId::from("host1"), Some(&mut sink));

        assert_eq!(sink.published.len(), 1);
    }

    #[test]
    fn test_on_open_publish_failure_is_not_fatal() {
        let mut rv = rendezvous("https://mesh.example/");
        let mut sink = Recorder {
            fail: true,
            ..Recorder::default()
        };

        let targets = rv.on_open(&PeerId::from("host1"), Some(&mut sink));

        assert!(targets.is_empty());
        assert!(rv.published().is_some());
    }

    #[test]
    fn test_on_open_joiner_returns_targets() {
        let mut rv = rendezvous("https://mesh.example/?p=host1,host2");
        let mut sink = Recorder::default();

        let targets = rv.on_open(&PeerId::from("join1"), Some(&mut sink));

        assert_eq!(targets, vec![PeerId::from("host1"), PeerId::from("host2")]);
        assert!(sink.published.is_empty());
    }

    #[test]
    fn test_on_open_filters_self_loop() {
        let mut rv = rendezvous("https://mesh.example/?p=host1,join1");
        let targets = rv.on_open(&PeerId::from("join1"), None);
        assert_eq!(targets, vec![PeerId::from("host1")]);
    }
}
