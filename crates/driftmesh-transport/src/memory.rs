//! In-process session provider.
//!
//! A [`MemoryNetwork`] is a shared broker. Each participant gets its own
//! [`MemoryTransport`] endpoint; opening registers an identifier with the
//! broker, connecting pairs two link ends, and every outcome is pushed
//! straight into the owners' event sinks. Nothing is delivered inline, so
//! callers never observe reentrant events.
//!
//! The broker can also inject faults: drop a participant's signaling
//! session, raise an arbitrary fault, or make a whole profile fail or stay
//! silent when opened.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    EventSink, LinkId, PeerId, Transport, TransportError, TransportEvent,
    TransportFault, TransportProfile,
};

/// Shared broker routing sessions and links between [`MemoryTransport`]s.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<PeerId, Registered>,
    links: HashMap<LinkId, LinkEnd>,
    failing_profiles: HashSet<String>,
    silent_profiles: HashSet<String>,
}

struct Registered {
    epoch: u64,
    events: EventSink,
}

/// One end of a paired link.
struct LinkEnd {
    holder: PeerId,
    other: LinkId,
    events: EventSink,
}

impl Registry {
    /// Removes both ends of a link, notifying each holder except
    /// `quiet` (if given).
    fn close_pair(&mut self, link: LinkId, quiet: Option<&PeerId>) {
        let Some(end) = self.links.remove(&link) else {
            return;
        };
        if quiet != Some(&end.holder) {
            let _ = end.events.send(TransportEvent::LinkClosed { link });
        }
        if let Some(other) = self.links.remove(&end.other) {
            if quiet != Some(&other.holder) {
                let _ = other
                    .events
                    .send(TransportEvent::LinkClosed { link: end.other });
            }
        }
    }

    fn assign_id(&self, candidate: &PeerId) -> PeerId {
        if !self.sessions.contains_key(candidate) {
            return candidate.clone();
        }
        (2u32..)
            .map(|n| PeerId::new(format!("{candidate}-{n}")))
            .find(|id| !self.sessions.contains_key(id))
            .unwrap_or_else(|| candidate.clone())
    }
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport endpoint that reports into `events`.
    pub fn endpoint(&self, events: EventSink) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            events,
            session: None,
        }
    }

    /// Simulates the signaling connection of `peer` dropping.
    ///
    /// Existing links stay up, as they would with a real provider.
    pub fn drop_session(&self, peer: &PeerId) {
        let registry = self.lock();
        if let Some(session) = registry.sessions.get(peer) {
            let _ = session.events.send(TransportEvent::Disconnected {
                epoch: session.epoch,
            });
        }
    }

    /// Raises a session-level fault on `peer`.
    pub fn raise(&self, peer: &PeerId, fault: TransportFault) {
        let registry = self.lock();
        if let Some(session) = registry.sessions.get(peer) {
            let _ = session.events.send(TransportEvent::Error {
                epoch: session.epoch,
                fault,
            });
        }
    }

    /// Makes every future `open` with this profile fail with a network
    /// error.
    pub fn fail_profile(&self, name: &str) {
        self.lock().failing_profiles.insert(name.to_string());
    }

    /// Makes every future `open` with this profile hang (no event at all).
    pub fn silence_profile(&self, name: &str) {
        self.lock().silent_profiles.insert(name.to_string());
    }

    /// Clears any fault injected for this profile.
    pub fn heal_profile(&self, name: &str) {
        let mut registry = self.lock();
        registry.failing_profiles.remove(name);
        registry.silent_profiles.remove(name);
    }

    /// Returns `true` if `peer` currently has an open session.
    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.lock().sessions.contains_key(peer)
    }

    /// Number of live link ends across the whole network.
    pub fn link_end_count(&self) -> usize {
        self.lock().links.len()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A single participant's endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    events: EventSink,
    /// The identifier and epoch of the open session, if any.
    session: Option<(PeerId, u64)>,
}

impl MemoryTransport {
    /// The identifier of the open session, if any.
    pub fn local_id(&self) -> Option<&PeerId> {
        self.session.as_ref().map(|(id, _)| id)
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

impl Transport for MemoryTransport {
    fn open(
        &mut self,
        epoch: u64,
        candidate: &PeerId,
        profile: &TransportProfile,
    ) -> Result<(), TransportError> {
        self.destroy();

        let mut registry = self.network.lock();
        if registry.failing_profiles.contains(&profile.name) {
            tracing::debug!(profile = %profile.name, "memory network: open fails");
            drop(registry);
            self.emit(TransportEvent::Error {
                epoch,
                fault: TransportFault::Network(format!(
                    "profile {} unreachable",
                    profile.name
                )),
            });
            return Ok(());
        }
        if registry.silent_profiles.contains(&profile.name) {
            tracing::debug!(profile = %profile.name, "memory network: open hangs");
            return Ok(());
        }

        let id = registry.assign_id(candidate);
        registry.sessions.insert(
            id.clone(),
            Registered {
                epoch,
                events: self.events.clone(),
            },
        );
        drop(registry);

        tracing::debug!(%id, epoch, "memory network: session open");
        self.session = Some((id.clone(), epoch));
        self.emit(TransportEvent::Open { epoch, id });
        Ok(())
    }

    fn connect(&mut self, remote: &PeerId) -> Result<LinkId, TransportError> {
        let (local, epoch) = self.session.clone().ok_or(TransportError::NotOpen)?;
        let local_link = LinkId::fresh();

        let mut registry = self.network.lock();
        let Some(remote_events) = registry
            .sessions
            .get(remote)
            .map(|session| session.events.clone())
        else {
            drop(registry);
            self.emit(TransportEvent::Error {
                epoch,
                fault: TransportFault::PeerUnavailable(remote.clone()),
            });
            return Ok(local_link);
        };

        let remote_link = LinkId::fresh();
        registry.links.insert(
            local_link,
            LinkEnd {
                holder: local.clone(),
                other: remote_link,
                events: self.events.clone(),
            },
        );
        registry.links.insert(
            remote_link,
            LinkEnd {
                holder: remote.clone(),
                other: local_link,
                events: remote_events.clone(),
            },
        );
        drop(registry);

        let _ = remote_events.send(TransportEvent::Connection {
            link: remote_link,
            remote: local,
        });
        let _ = remote_events.send(TransportEvent::LinkOpen { link: remote_link });
        self.emit(TransportEvent::LinkOpen { link: local_link });
        Ok(local_link)
    }

    fn send(&mut self, link: LinkId, frame: Vec<u8>) -> Result<(), TransportError> {
        let (local, _) = self.session.as_ref().ok_or(TransportError::NotOpen)?;
        let registry = self.network.lock();
        let end = registry
            .links
            .get(&link)
            .filter(|end| &end.holder == local)
            .ok_or(TransportError::UnknownLink(link))?;
        let other = registry
            .links
            .get(&end.other)
            .ok_or(TransportError::UnknownLink(link))?;
        other
            .events
            .send(TransportEvent::Data {
                link: end.other,
                frame,
            })
            .map_err(|_| TransportError::ConnectionClosed(format!("{link}")))
    }

    fn close_link(&mut self, link: LinkId) {
        self.network.lock().close_pair(link, None);
    }

    fn destroy(&mut self) {
        let Some((local, epoch)) = self.session.take() else {
            return;
        };
        let mut registry = self.network.lock();
        let owned = registry
            .sessions
            .get(&local)
            .is_some_and(|session| session.epoch == epoch && session.events.same_channel(&self.events));
        if owned {
            registry.sessions.remove(&local);
        }
        let held: Vec<LinkId> = registry
            .links
            .iter()
            .filter(|(_, end)| end.holder == local && end.events.same_channel(&self.events))
            .map(|(link, _)| *link)
            .collect();
        for link in held {
            registry.close_pair(link, Some(&local));
        }
        tracing::debug!(%local, epoch, "memory network: session destroyed");
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}
