//! The mesh manager: one link per remote participant, plus routing.
//!
//! [`Mesh`] is driven entirely from the outside. The owner feeds it
//! transport events and passes in the transport whenever the mesh needs to
//! dial, send, or close. Nothing here blocks or spawns.
//!
//! # Join protocol
//!
//! Every link, in either direction, opens with a `PresenceAnnounce` of the
//! local record. A link we dialed as a joiner also sends `RequestRoster`.
//! The receiving side answers with its own announce and forwards a
//! `RelayIntroduction` naming the joiner to every other link it holds; each
//! introduced participant dials the joiner (or, if already linked,
//! announces over the existing link).

use std::collections::HashMap;
use std::time::Instant;

use driftmesh_protocol::{
    decode_frame, encode_message, Inbound, JsonCodec, Message, ParticipantRecord, PeerId, Recipient,
    RelayIntroduction, Vec3,
};
use driftmesh_transport::{LinkId, Transport};

use crate::replicator::{Applied, Outbound};
use crate::{ArtifactPayload, MeshConfig, MeshError, Replicator};

/// Why a link was created. Decides what is sent when it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// We dialed a locator target and want its roster.
    Join,
    /// We dialed someone we were introduced to.
    Introduce,
    /// The remote dialed us.
    Accept,
}

impl LinkRole {
    fn is_outbound(self) -> bool {
        !matches!(self, Self::Accept)
    }
}

#[derive(Debug, Clone)]
struct LinkEntry {
    remote: PeerId,
    role: LinkRole,
    open: bool,
}

/// Cumulative mesh counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshStats {
    pub links_opened: u64,
    pub links_closed: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub malformed_dropped: u64,
    pub unknown_ignored: u64,
    pub artifact_relays: u64,
}

/// Something worth reporting that happened inside the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    LinkOpened { link: LinkId, peer: PeerId },
    LinkClosed { link: LinkId, peer: PeerId },
    ParticipantJoined(PeerId),
    ParticipantLeft(PeerId),
    /// A frame was dropped as malformed.
    Malformed { peer: PeerId, reason: String },
    /// A frame of an unknown kind was ignored.
    UnknownKind { peer: PeerId, kind: String },
    ArtifactRelayed { artifact_id: String, from: PeerId },
    /// A dial target does not exist.
    PeerUnavailable(PeerId),
    /// A second link to an already-linked participant was closed.
    DuplicateLink { link: LinkId, peer: PeerId },
}

/// Link bookkeeping and message routing for one participant.
pub struct Mesh {
    codec: JsonCodec,
    config: MeshConfig,
    local_id: Option<PeerId>,
    links: HashMap<LinkId, LinkEntry>,
    /// The one link kept per remote participant.
    by_peer: HashMap<PeerId, LinkId>,
    replica: Replicator,
    stats: MeshStats,
    events: Vec<MeshEvent>,
    last_rejoin: Option<Instant>,
}

impl Mesh {
    pub fn new(config: MeshConfig) -> Self {
        let config = config.validated();
        Self {
            codec: JsonCodec,
            replica: Replicator::new(&config),
            config,
            local_id: None,
            links: HashMap::new(),
            by_peer: HashMap::new(),
            stats: MeshStats::default(),
            events: Vec::new(),
            last_rejoin: None,
        }
    }

    // -----------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------

    /// Installs the local record for a freshly opened session.
    ///
    /// Safe to call on every open; a changed identifier replaces the old
    /// local entry.
    pub fn on_session_open(&mut self, local: ParticipantRecord) {
        self.local_id = Some(local.id.clone());
        self.replica.set_local(local);
    }

    /// Dials every locator target.
    pub fn join<T: Transport>(&mut self, transport: &mut T, targets: &[PeerId]) {
        for target in targets {
            self.connect(transport, target, LinkRole::Join);
        }
    }

    /// Re-dials locator targets that are neither linked nor pending, at
    /// most once per `rejoin_interval`.
    pub fn rejoin<T: Transport>(&mut self, transport: &mut T, targets: &[PeerId], now: Instant) {
        let Some(interval) = self.config.rejoin_interval else {
            return;
        };
        if self.local_id.is_none() {
            return;
        }
        if self
            .last_rejoin
            .is_some_and(|last| now.saturating_duration_since(last) < interval)
        {
            return;
        }
        let missing: Vec<PeerId> = targets
            .iter()
            .filter(|target| !self.by_peer.contains_key(*target) && !self.is_local(target))
            .cloned()
            .collect();
        if missing.is_empty() {
            return;
        }
        self.last_rejoin = Some(now);
        tracing::debug!(targets = missing.len(), "re-dialing unlinked locator targets");
        for target in &missing {
            self.connect(transport, target, LinkRole::Join);
        }
    }

    /// Closes every link and forgets every remote participant.
    pub fn close_all<T: Transport>(&mut self, transport: &mut T) {
        let links: Vec<LinkId> = self.links.keys().copied().collect();
        for link in links {
            transport.close_link(link);
            if let Some(entry) = self.links.remove(&link) {
                self.note_closed(link, &entry);
            }
        }
        self.by_peer.clear();
        self.replica.roster_mut().retain_local();
    }

    // -----------------------------------------------------------------
    // Link events
    // -----------------------------------------------------------------

    /// Dials `peer` unless it is us or already linked (open or pending).
    pub fn connect<T: Transport>(&mut self, transport: &mut T, peer: &PeerId, role: LinkRole) -> Option<LinkId> {
        if self.is_local(peer) {
            tracing::debug!(%peer, "not dialing self");
            return None;
        }
        if let Some(link) = self.by_peer.get(peer) {
            tracing::debug!(%peer, %link, "already linked, not dialing");
            return None;
        }
        match transport.connect(peer) {
            Ok(link) => {
                tracing::debug!(%peer, %link, ?role, "dialing");
                self.links.insert(
                    link,
                    LinkEntry {
                        remote: peer.clone(),
                        role,
                        open: false,
                    },
                );
                self.by_peer.insert(peer.clone(), link);
                Some(link)
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "dial failed");
                None
            }
        }
    }

    /// A remote participant dialed us.
    pub fn on_connection<T: Transport>(&mut self, transport: &mut T, link: LinkId, remote: PeerId) {
        if self.is_local(&remote) {
            tracing::debug!(%link, "closing link from self");
            transport.close_link(link);
            return;
        }

        let mut role = LinkRole::Accept;
        if let Some(&existing) = self.by_peer.get(&remote) {
            let existing_role = self.links.get(&existing).map(|entry| entry.role);
            // Both sides keep the link dialed by the smaller identifier.
            let keep_incoming = match (existing_role, &self.local_id) {
                (Some(existing_role), Some(local)) if existing_role.is_outbound() => remote < *local,
                _ => false,
            };
            if !keep_incoming {
                tracing::debug!(%remote, %link, kept = %existing, "duplicate link, closing incoming");
                self.events.push(MeshEvent::DuplicateLink { link, peer: remote });
                transport.close_link(link);
                return;
            }
            tracing::debug!(%remote, %link, dropped = %existing, "duplicate link, closing ours");
            if let Some(entry) = self.links.remove(&existing) {
                if entry.role == LinkRole::Join {
                    role = LinkRole::Join;
                }
                if entry.open {
                    self.stats.links_closed += 1;
                }
            }
            self.events.push(MeshEvent::DuplicateLink {
                link: existing,
                peer: remote.clone(),
            });
            transport.close_link(existing);
        }

        self.links.insert(
            link,
            LinkEntry {
                remote: remote.clone(),
                role,
                open: false,
            },
        );
        self.by_peer.insert(remote, link);
    }

    /// A link is ready: announce ourselves, and ask for the roster if we
    /// are joining through it.
    pub fn on_link_open<T: Transport>(&mut self, transport: &mut T, link: LinkId) {
        let Some(entry) = self.links.get_mut(&link) else {
            tracing::debug!(%link, "open for unknown link, ignoring");
            return;
        };
        if entry.open {
            return;
        }
        entry.open = true;
        let remote = entry.remote.clone();
        let role = entry.role;

        self.stats.links_opened += 1;
        tracing::info!(peer = %remote, %link, ?role, "link open");
        self.events.push(MeshEvent::LinkOpened {
            link,
            peer: remote.clone(),
        });

        let mut outbound = Vec::new();
        if let Some(local) = self.replica.local_record() {
            outbound.push((Recipient::Peer(remote.clone()), Message::PresenceAnnounce(local.clone())));
        }
        if role == LinkRole::Join {
            outbound.push((Recipient::Peer(remote), Message::request_roster()));
        }
        self.dispatch(transport, outbound);
    }

    /// A frame arrived on `link`.
    pub fn on_data<T: Transport>(&mut self, transport: &mut T, link: LinkId, frame: &[u8], now: Instant) {
        let Some(remote) = self.links.get(&link).map(|entry| entry.remote.clone()) else {
            tracing::debug!(%link, "data on unknown link, ignoring");
            return;
        };
        self.stats.messages_in += 1;

        let message = match decode_frame(&self.codec, frame) {
            Ok(Inbound::Message(message)) => message,
            Ok(Inbound::Unknown(kind)) => {
                tracing::debug!(peer = %remote, %kind, "unknown message kind, ignoring");
                self.stats.unknown_ignored += 1;
                self.events.push(MeshEvent::UnknownKind { peer: remote, kind });
                return;
            }
            Err(e) => {
                self.drop_malformed(remote, &MeshError::from(e));
                return;
            }
        };

        match message {
            Message::RequestRoster(_) => self.on_roster_request(transport, &remote),
            Message::RelayIntroduction(intro) => self.on_introduction(transport, &remote, &intro),
            other => match self.replica.apply(&remote, &other, now) {
                Ok((applied, outbound)) => {
                    match applied {
                        Applied::Joined(peer) => self.events.push(MeshEvent::ParticipantJoined(peer)),
                        Applied::ArtifactRelayed(artifact_id) => {
                            self.stats.artifact_relays += 1;
                            self.events.push(MeshEvent::ArtifactRelayed {
                                artifact_id,
                                from: remote,
                            });
                        }
                        Applied::Updated | Applied::Ignored => {}
                    }
                    self.dispatch(transport, outbound);
                }
                Err(e) => self.drop_malformed(remote, &e),
            },
        }
    }

    /// A link closed. Removes the participant it carried, once.
    pub fn on_link_closed(&mut self, link: LinkId) {
        let Some(entry) = self.links.remove(&link) else {
            tracing::debug!(%link, "close for unknown link, ignoring");
            return;
        };
        self.note_closed(link, &entry);
        if self.by_peer.get(&entry.remote) == Some(&link) {
            self.by_peer.remove(&entry.remote);
            if self.replica.roster_mut().remove(&entry.remote).is_some() {
                tracing::info!(peer = %entry.remote, "participant left");
                self.events.push(MeshEvent::ParticipantLeft(entry.remote));
            }
        }
    }

    /// A link failed. Handled exactly like a close.
    pub fn on_link_error(&mut self, link: LinkId, reason: &str) {
        tracing::debug!(%link, %reason, "link error");
        self.on_link_closed(link);
    }

    /// A dial target does not exist: drop the pending attempt.
    pub fn on_peer_unavailable(&mut self, peer: &PeerId) {
        tracing::debug!(%peer, "peer unavailable");
        self.events.push(MeshEvent::PeerUnavailable(peer.clone()));
        let Some(&link) = self.by_peer.get(peer) else {
            return;
        };
        if self.links.get(&link).is_some_and(|entry| !entry.open) {
            self.links.remove(&link);
            self.by_peer.remove(peer);
        }
    }

    // -----------------------------------------------------------------
    // Local changes
    // -----------------------------------------------------------------

    /// Moves the local participant and sends a position update if the
    /// rate limit allows.
    pub fn set_local_pose<T: Transport>(&mut self, transport: &mut T, position: Vec3, rotation: f32, now: Instant) {
        self.replica.set_local_pose(position, rotation);
        self.flush_position(transport, now);
    }

    /// Sends a held-back position update once the rate limit allows.
    pub fn flush_position<T: Transport>(&mut self, transport: &mut T, now: Instant) {
        if let Some(update) = self.replica.take_position_update(now) {
            self.dispatch(transport, vec![(Recipient::All, update)]);
        }
    }

    /// When [`flush_position`](Self::flush_position) has something to send.
    pub fn position_deadline(&self) -> Option<Instant> {
        self.replica.position_deadline()
    }

    /// Stores a local artifact edit and broadcasts it to every link.
    ///
    /// # Errors
    /// Returns an artifact error if `payload` is not an acceptable data URL.
    pub fn edit_artifact<T: Transport>(
        &mut self,
        transport: &mut T,
        artifact_id: &str,
        payload: &str,
        now: Instant,
    ) -> Result<(), MeshError> {
        let outbound = self.replica.edit_artifact(artifact_id, payload, now)?;
        self.dispatch(transport, outbound);
        Ok(())
    }

    pub fn artifact(&self, artifact_id: &str, now: Instant) -> ArtifactPayload {
        self.replica.artifact(artifact_id, now)
    }

    /// Drops expired artifacts.
    pub fn prune(&mut self, now: Instant) -> usize {
        self.replica.prune(now)
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    /// Number of open links.
    pub fn link_count(&self) -> usize {
        self.links.values().filter(|entry| entry.open).count()
    }

    /// Whether there is an open link to `peer`.
    pub fn is_linked(&self, peer: &PeerId) -> bool {
        self.by_peer
            .get(peer)
            .and_then(|link| self.links.get(link))
            .is_some_and(|entry| entry.open)
    }

    /// The link kept for `peer`, open or pending.
    pub fn link_for(&self, peer: &PeerId) -> Option<LinkId> {
        self.by_peer.get(peer).copied()
    }

    /// Remote identifiers with an open link, sorted.
    pub fn linked_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .links
            .values()
            .filter(|entry| entry.open)
            .map(|entry| entry.remote.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Every participant, the local one included, ordered by identifier.
    pub fn participants(&self) -> Vec<ParticipantRecord> {
        self.replica.roster().participants().cloned().collect()
    }

    pub fn replica(&self) -> &Replicator {
        &self.replica
    }

    pub fn stats(&self) -> MeshStats {
        self.stats
    }

    /// Takes the events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<MeshEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn on_roster_request<T: Transport>(&mut self, transport: &mut T, from: &PeerId) {
        let Some(local) = self.replica.local_record().cloned() else {
            return;
        };
        tracing::debug!(peer = %from, "roster requested, introducing to other links");
        self.dispatch(
            transport,
            vec![
                (Recipient::Peer(from.clone()), Message::PresenceAnnounce(local)),
                (
                    Recipient::AllExcept(from.clone()),
                    Message::RelayIntroduction(RelayIntroduction {
                        target_id: from.clone(),
                    }),
                ),
            ],
        );
    }

    fn on_introduction<T: Transport>(&mut self, transport: &mut T, from: &PeerId, intro: &RelayIntroduction) {
        let target = &intro.target_id;
        if self.is_local(target) {
            return;
        }
        tracing::debug!(%target, via = %from, "introduced");
        if self.is_linked(target) {
            if let Some(local) = self.replica.local_record().cloned() {
                self.dispatch(
                    transport,
                    vec![(Recipient::Peer(target.clone()), Message::PresenceAnnounce(local))],
                );
            }
        } else {
            // A pending link announces when it opens.
            self.connect(transport, target, LinkRole::Introduce);
        }
    }

    /// Sends each message to its recipients over open links.
    ///
    /// Works on a snapshot of the link set; links whose send fails are
    /// closed after the whole batch has gone out.
    fn dispatch<T: Transport>(&mut self, transport: &mut T, outbound: Outbound) {
        if outbound.is_empty() {
            return;
        }
        let open: Vec<(LinkId, PeerId)> = self
            .links
            .iter()
            .filter(|(_, entry)| entry.open)
            .map(|(link, entry)| (*link, entry.remote.clone()))
            .collect();

        let mut failed = Vec::new();
        for (recipient, message) in outbound {
            let frame = match encode_message(&self.codec, &message) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(kind = message.kind(), error = %e, "failed to encode message");
                    continue;
                }
            };
            for (link, remote) in &open {
                let wanted = match &recipient {
                    Recipient::All => true,
                    Recipient::Peer(peer) => peer == remote,
                    Recipient::AllExcept(excluded) => excluded != remote,
                };
                if !wanted || failed.contains(link) {
                    continue;
                }
                match transport.send(*link, frame.clone()) {
                    Ok(()) => self.stats.messages_out += 1,
                    Err(e) => {
                        tracing::debug!(%link, peer = %remote, error = %e, "send failed, closing link");
                        failed.push(*link);
                    }
                }
            }
        }

        for link in failed {
            transport.close_link(link);
            self.on_link_closed(link);
        }
    }

    fn drop_malformed(&mut self, peer: PeerId, error: &MeshError) {
        tracing::warn!(%peer, %error, "dropping malformed message");
        self.stats.malformed_dropped += 1;
        self.events.push(MeshEvent::Malformed {
            peer,
            reason: error.to_string(),
        });
    }

    fn note_closed(&mut self, link: LinkId, entry: &LinkEntry) {
        if entry.open {
            self.stats.links_closed += 1;
            tracing::info!(peer = %entry.remote, %link, "link closed");
            self.events.push(MeshEvent::LinkClosed {
                link,
                peer: entry.remote.clone(),
            });
        }
    }

    fn is_local(&self, peer: &PeerId) -> bool {
        self.local_id.as_ref() == Some(peer)
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("local_id", &self.local_id)
            .field("links", &self.links.len())
            .field("participants", &self.replica.roster().len())
            .finish()
    }
}
