//! The participant set.

use std::collections::BTreeMap;

use driftmesh_protocol::{ParticipantRecord, PeerId, PositionUpdate, Vec3};

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    /// The record was for the local participant and was ignored.
    IgnoredSelf,
}

/// Every known participant, keyed by identifier.
///
/// Holds exactly one record per identifier. The local participant's
/// record exists once the transport session has opened and is only ever
/// changed through the `local` methods; remote messages about the local
/// id are ignored.
#[derive(Debug, Default)]
pub struct Roster {
    local_id: Option<PeerId>,
    participants: BTreeMap<PeerId, ParticipantRecord>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs (or replaces) the local record.
    ///
    /// If the local identifier changed (a reopened session got a
    /// different id), the old local entry is removed.
    pub fn set_local(&mut self, record: ParticipantRecord) {
        if let Some(old) = self.local_id.take() {
            if old != record.id {
                tracing::info!(%old, new = %record.id, "local identifier changed");
                self.participants.remove(&old);
            }
        }
        self.participants.remove(&record.id);
        self.local_id = Some(record.id.clone());
        self.participants.insert(record.id.clone(), record);
    }

    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    pub fn local(&self) -> Option<&ParticipantRecord> {
        self.local_id.as_ref().and_then(|id| self.participants.get(id))
    }

    /// Moves the local participant. Returns `true` if the pose changed.
    pub fn set_local_pose(&mut self, position: Vec3, rotation: f32) -> bool {
        let Some(record) = self
            .local_id
            .as_ref()
            .and_then(|id| self.participants.get_mut(id))
        else {
            return false;
        };
        if record.position == position && record.rotation == rotation {
            return false;
        }
        record.position = position;
        record.rotation = rotation;
        true
    }

    /// Creates or updates a remote participant.
    pub fn upsert(&mut self, record: ParticipantRecord) -> Upsert {
        if self.is_local(&record.id) {
            return Upsert::IgnoredSelf;
        }
        match self.participants.insert(record.id.clone(), record) {
            Some(_) => Upsert::Updated,
            None => Upsert::Created,
        }
    }

    /// Moves a known remote participant. Returns `false` (and does
    /// nothing) for unknown or local identifiers.
    pub fn update_position(&mut self, update: &PositionUpdate) -> bool {
        if self.is_local(&update.id) {
            return false;
        }
        match self.participants.get_mut(&update.id) {
            Some(record) => {
                record.position = update.position;
                record.rotation = update.rotation;
                true
            }
            None => false,
        }
    }

    /// Removes a remote participant. The local record is never removed.
    pub fn remove(&mut self, id: &PeerId) -> Option<ParticipantRecord> {
        if self.is_local(id) {
            return None;
        }
        self.participants.remove(id)
    }

    /// Drops every remote participant.
    pub fn retain_local(&mut self) {
        let local = self.local_id.clone();
        self.participants.retain(|id, _| Some(id) == local.as_ref());
    }

    pub fn get(&self, id: &PeerId) -> Option<&ParticipantRecord> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.participants.contains_key(id)
    }

    /// Number of participants, including the local one.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// All participants, ordered by identifier.
    pub fn participants(&self) -> impl Iterator<Item = &ParticipantRecord> {
        self.participants.values()
    }

    fn is_local(&self, id: &PeerId) -> bool {
        self.local_id.as_ref() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftmesh_protocol::Color;

    fn record(id: &str, x: f32) -> ParticipantRecord {
        ParticipantRecord {
            id: PeerId::from(id),
            username: format!("user-{id}"),
            color: Color(0xffffff),
            position: Vec3::new(x, 0.0, 0.0),
            rotation: 0.0,
        }
    }

    fn roster_with_local() -> Roster {
        let mut roster = Roster::new();
        roster.set_local(record("me", 0.0));
        roster
    }

    #[test]
    fn test_upsert_same_id_keeps_one_entry_with_latest_fields() {
        let mut roster = roster_with_local();
        assert_eq!(roster.upsert(record("a", 1.0)), Upsert::Created);
        assert_eq!(roster.upsert(record("a", 2.0)), Upsert::Updated);
        assert_eq!(roster.upsert(record("a", 3.0)), Upsert::Updated);

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.get(&PeerId::from("a")).unwrap().position.x, 3.0);
    }

    #[test]
    fn test_upsert_local_id_is_ignored() {
        let mut roster = roster_with_local();
        assert_eq!(roster.upsert(record("me", 9.0)), Upsert::IgnoredSelf);
        assert_eq!(roster.local().unwrap().position.x, 0.0);
    }

    #[test]
    fn test_update_position_unknown_is_noop() {
        let mut roster = roster_with_local();
        let update = PositionUpdate {
            id: PeerId::from("ghost"),
            position: Vec3::new(1.0, 1.0, 1.0),
            rotation: 0.0,
        };
        assert!(!roster.update_position(&update));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_update_position_known_moves_participant() {
        let mut roster = roster_with_local();
        roster.upsert(record("a", 0.0));
        let update = PositionUpdate {
            id: PeerId::from("a"),
            position: Vec3::new(5.0, 0.0, 0.0),
            rotation: 1.0,
        };
        assert!(roster.update_position(&update));
        let a = roster.get(&PeerId::from("a")).unwrap();
        assert_eq!(a.position.x, 5.0);
        assert_eq!(a.rotation, 1.0);
    }

    #[test]
    fn test_remove_twice_removes_once() {
        let mut roster = roster_with_local();
        roster.upsert(record("a", 0.0));
        assert!(roster.remove(&PeerId::from("a")).is_some());
        assert!(roster.remove(&PeerId::from("a")).is_none());
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_remove_never_drops_local() {
        let mut roster = roster_with_local();
        assert!(roster.remove(&PeerId::from("me")).is_none());
        assert!(roster.local().is_some());
    }

    #[test]
    fn test_set_local_with_new_id_replaces_old_entry() {
        let mut roster = roster_with_local();
        roster.set_local(record("me-2", 0.0));
        assert!(!roster.contains(&PeerId::from("me")));
        assert_eq!(roster.local_id(), Some(&PeerId::from("me-2")));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_retain_local_clears_remotes() {
        let mut roster = roster_with_local();
        roster.upsert(record("a", 0.0));
        roster.upsert(record("b", 0.0));
        roster.retain_local();
        assert_eq!(roster.len(), 1);
        assert!(roster.local().is_some());
    }

    #[test]
    fn test_set_local_pose_reports_change() {
        let mut roster = roster_with_local();
        assert!(roster.set_local_pose(Vec3::new(1.0, 0.0, 0.0), 0.0));
        assert!(!roster.set_local_pose(Vec3::new(1.0, 0.0, 0.0), 0.0));
    }
}
