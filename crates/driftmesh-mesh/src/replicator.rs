//! Presence and artifact replication.
//!
//! The replicator owns the [`Roster`] and the [`ArtifactStore`]. It applies
//! inbound messages and answers with what should be sent on; it never
//! touches links itself.

use std::time::Instant;

use driftmesh_protocol::{
    ArtifactUpdate, Message, ParticipantRecord, PeerId, PositionUpdate, Recipient, Vec3,
};
use driftmesh_tick::Throttle;

use crate::{ArtifactPayload, ArtifactStore, MeshConfig, MeshError, Roster, Upsert};

/// Outbound messages produced by applying an update.
pub type Outbound = Vec<(Recipient, Message)>;

/// What applying one inbound message changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A participant was added.
    Joined(PeerId),
    /// Something changed; nothing worth reporting.
    Updated,
    /// Nothing changed.
    Ignored,
    /// An artifact changed and is being relayed.
    ArtifactRelayed(String),
}

/// Applies presence and artifact updates and decides what to broadcast.
#[derive(Debug)]
pub struct Replicator {
    roster: Roster,
    artifacts: ArtifactStore,
    position_throttle: Throttle,
    /// The local pose changed since the last broadcast.
    position_dirty: bool,
}

impl Replicator {
    pub fn new(config: &MeshConfig) -> Self {
        Self {
            roster: Roster::new(),
            artifacts: ArtifactStore::new(config.artifact_retention, config.max_artifact_payload),
            position_throttle: Throttle::new(config.position_interval()),
            position_dirty: false,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut Roster {
        &mut self.roster
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Installs the local record under a newly assigned identifier,
    /// keeping the current pose.
    pub fn set_local(&mut self, mut record: ParticipantRecord) {
        if let Some(current) = self.roster.local() {
            record.position = current.position;
            record.rotation = current.rotation;
        }
        self.roster.set_local(record);
    }

    /// The local record, once the session has opened.
    pub fn local_record(&self) -> Option<&ParticipantRecord> {
        self.roster.local()
    }

    /// Applies a presence or artifact message that arrived from `from`.
    ///
    /// # Errors
    /// - [`MeshError::OriginMismatch`] if a presence or position message
    ///   describes someone other than `from`.
    /// - [`MeshError::InvalidArtifact`] / [`MeshError::ArtifactTooLarge`]
    ///   for bad artifact payloads.
    pub fn apply(
        &mut self,
        from: &PeerId,
        message: &Message,
        now: Instant,
    ) -> Result<(Applied, Outbound), MeshError> {
        match message {
            Message::PresenceAnnounce(record) => {
                check_origin(from, &record.id)?;
                let applied = match self.roster.upsert(record.clone()) {
                    Upsert::Created => {
                        tracing::info!(peer = %record.id, username = %record.username, "participant joined");
                        Applied::Joined(record.id.clone())
                    }
                    Upsert::Updated => Applied::Updated,
                    Upsert::IgnoredSelf => Applied::Ignored,
                };
                Ok((applied, Vec::new()))
            }
            Message::PositionUpdate(update) => {
                check_origin(from, &update.id)?;
                let applied = if self.roster.update_position(update) {
                    Applied::Updated
                } else {
                    tracing::debug!(peer = %update.id, "position for unknown participant ignored");
                    Applied::Ignored
                };
                Ok((applied, Vec::new()))
            }
            Message::ArtifactUpdate(update) => {
                let payload = ArtifactPayload::parse(&update.payload, self.artifacts.max_payload())?;
                if self.artifacts.put(&update.artifact_id, payload, now) {
                    tracing::debug!(artifact = %update.artifact_id, %from, "artifact changed, relaying");
                    Ok((
                        Applied::ArtifactRelayed(update.artifact_id.clone()),
                        vec![(Recipient::AllExcept(from.clone()), message.clone())],
                    ))
                } else {
                    Ok((Applied::Ignored, Vec::new()))
                }
            }
            Message::RequestRoster(_) | Message::RelayIntroduction(_) => Ok((Applied::Ignored, Vec::new())),
        }
    }

    /// Moves the local participant. The change is broadcast by the next
    /// [`take_position_update`](Self::take_position_update) the throttle
    /// lets through.
    pub fn set_local_pose(&mut self, position: Vec3, rotation: f32) {
        if self.roster.set_local_pose(position, rotation) {
            self.position_dirty = true;
        }
    }

    /// The pending local position update, if the pose changed and the
    /// rate limit allows sending now.
    pub fn take_position_update(&mut self, now: Instant) -> Option<Message> {
        if !self.position_dirty {
            return None;
        }
        let local = self.roster.local()?;
        if !self.position_throttle.ready(now) {
            return None;
        }
        self.position_dirty = false;
        Some(Message::PositionUpdate(PositionUpdate {
            id: local.id.clone(),
            position: local.position,
            rotation: local.rotation,
        }))
    }

    /// When a held-back position update may next be sent.
    pub fn position_deadline(&self) -> Option<Instant> {
        if self.position_dirty {
            self.position_throttle.next_ready()
        } else {
            None
        }
    }

    /// Applies a local artifact edit and returns the broadcast for it.
    ///
    /// # Errors
    /// Returns an artifact error if `payload` is not an acceptable data URL.
    pub fn edit_artifact(&mut self, artifact_id: &str, payload: &str, now: Instant) -> Result<Outbound, MeshError> {
        if artifact_id.is_empty() {
            return Err(MeshError::InvalidArtifact("empty artifact id".into()));
        }
        let parsed = ArtifactPayload::parse(payload, self.artifacts.max_payload())?;
        self.artifacts.put(artifact_id, parsed, now);
        Ok(vec![(
            Recipient::All,
            Message::ArtifactUpdate(ArtifactUpdate {
                artifact_id: artifact_id.to_string(),
                payload: payload.to_string(),
            }),
        )])
    }

    /// The live payload for an artifact (blank if absent or expired).
    pub fn artifact(&self, artifact_id: &str, now: Instant) -> ArtifactPayload {
        self.artifacts.get(artifact_id, now)
    }

    /// Drops expired artifacts.
    pub fn prune(&mut self, now: Instant) -> usize {
        self.artifacts.prune(now)
    }
}

fn check_origin(from: &PeerId, claimed: &PeerId) -> Result<(), MeshError> {
    if from == claimed {
        Ok(())
    } else {
        Err(MeshError::OriginMismatch {
            claimed: claimed.clone(),
            link_peer: from.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use driftmesh_protocol::Color;

    fn record(id: &str) -> ParticipantRecord {
        ParticipantRecord {
            id: PeerId::from(id),
            username: id.to_string(),
            color: Color(1),
            position: Vec3::ZERO,
            rotation: 0.0,
        }
    }

    fn replicator() -> Replicator {
        let mut replicator = Replicator::new(&MeshConfig::default());
        replicator.set_local(record("me"));
        replicator
    }

    fn artifact(id: &str, body: &[u8]) -> Message {
        Message::ArtifactUpdate(ArtifactUpdate {
            artifact_id: id.to_string(),
            payload: ArtifactPayload::encode("image/png", body).into_inner(),
        })
    }

    #[test]
    fn test_apply_presence_from_owner_joins() {
        let mut r = replicator();
        let (applied, out) = r
            .apply(&PeerId::from("a"), &Message::PresenceAnnounce(record("a")), Instant::now())
            .unwrap();
        assert_eq!(applied, Applied::Joined(PeerId::from("a")));
        assert!(out.is_empty());
        assert_eq!(r.roster().len(), 2);
    }

    #[test]
    fn test_apply_presence_for_other_id_is_rejected() {
        let mut r = replicator();
        let result = r.apply(&PeerId::from("a"), &Message::PresenceAnnounce(record("b")), Instant::now());
        assert!(matches!(result, Err(MeshError::OriginMismatch { .. })));
        assert_eq!(r.roster().len(), 1);
    }

    #[test]
    fn test_apply_artifact_relays_to_everyone_but_sender() {
        let mut r = replicator();
        let msg = artifact("wall", b"x");
        let (applied, out) = r.apply(&PeerId::from("a"), &msg, Instant::now()).unwrap();
        assert_eq!(applied, Applied::ArtifactRelayed("wall".into()));
        assert_eq!(out, vec![(Recipient::AllExcept(PeerId::from("a")), msg)]);
    }

    #[test]
    fn test_apply_same_artifact_twice_relays_once() {
        let mut r = replicator();
        let now = Instant::now();
        let msg = artifact("wall", b"x");
        r.apply(&PeerId::from("a"), &msg, now).unwrap();
        let (_, out) = r.apply(&PeerId::from("b"), &msg, now).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_apply_invalid_artifact_is_error() {
        let mut r = replicator();
        let msg = Message::ArtifactUpdate(ArtifactUpdate {
            artifact_id: "wall".into(),
            payload: "not-a-data-url".into(),
        });
        assert!(r.apply(&PeerId::from("a"), &msg, Instant::now()).is_err());
        assert!(r.artifact("wall", Instant::now()).is_blank());
    }

    #[test]
    fn test_edit_artifact_broadcasts_to_all() {
        let mut r = replicator();
        let payload = ArtifactPayload::encode("image/png", b"x").into_inner();
        let out = r.edit_artifact("wall", &payload, Instant::now()).unwrap();
        assert!(matches!(out.as_slice(), [(Recipient::All, Message::ArtifactUpdate(_))]));
        assert_eq!(r.artifact("wall", Instant::now()).as_str(), payload);
    }

    #[test]
    fn test_take_position_update_is_rate_limited() {
        let mut r = replicator();
        let t0 = Instant::now();

        r.set_local_pose(Vec3::new(1.0, 0.0, 0.0), 0.0);
        assert!(r.take_position_update(t0).is_some());

        r.set_local_pose(Vec3::new(2.0, 0.0, 0.0), 0.0);
        assert!(r.take_position_update(t0 + Duration::from_millis(10)).is_none());
        assert_eq!(r.position_deadline(), Some(t0 + Duration::from_millis(100)));

        let Some(Message::PositionUpdate(update)) = r.take_position_update(t0 + Duration::from_millis(100)) else {
            panic!("expected position update");
        };
        assert_eq!(update.position.x, 2.0);
        assert!(r.take_position_update(t0 + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_set_local_keeps_pose_across_rekey() {
        let mut r = replicator();
        r.set_local_pose(Vec3::new(4.0, 0.0, 0.0), 1.0);
        r.set_local(record("me-2"));
        let local = r.local_record().unwrap();
        assert_eq!(local.id, PeerId::from("me-2"));
        assert_eq!(local.position.x, 4.0);
    }
}
