//! Counters, a bounded event log, and the snapshot shown to the UI.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use driftmesh_mesh::{MeshEvent, MeshStats};
use driftmesh_protocol::{ParticipantRecord, PeerId};
use driftmesh_session::ConnectionStatus;
use serde::Serialize;

/// Cumulative counters for one participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub links_opened: u64,
    pub links_closed: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub malformed_dropped: u64,
    pub unknown_ignored: u64,
    pub artifact_relays: u64,
    pub reconnect_attempts: u64,
    pub fallbacks: u64,
    pub session_opens: u64,
}

impl Counters {
    /// Copies the mesh-owned counters over.
    pub(crate) fn absorb_mesh(&mut self, stats: MeshStats) {
        self.links_opened = stats.links_opened;
        self.links_closed = stats.links_closed;
        self.messages_in = stats.messages_in;
        self.messages_out = stats.messages_out;
        self.malformed_dropped = stats.malformed_dropped;
        self.unknown_ignored = stats.unknown_ignored;
        self.artifact_relays = stats.artifact_relays;
    }
}

/// One entry in the rolling event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Time since the participant started.
    pub elapsed: Duration,
    pub text: String,
}

/// Owns the counters and the event log.
#[derive(Debug)]
pub struct Diagnostics {
    started: Instant,
    capacity: usize,
    log: VecDeque<LogEntry>,
    counters: Counters,
}

impl Diagnostics {
    pub fn new(capacity: usize, now: Instant) -> Self {
        let capacity = capacity.max(1);
        Self {
            started: now,
            capacity,
            log: VecDeque::with_capacity(capacity),
            counters: Counters::default(),
        }
    }

    /// Appends to the log, evicting the oldest entry when full.
    pub fn record(&mut self, now: Instant, text: impl Into<String>) {
        if self.log.len() == self.capacity {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            elapsed: now.saturating_duration_since(self.started),
            text: text.into(),
        });
    }

    pub fn record_mesh_event(&mut self, now: Instant, event: &MeshEvent) {
        self.record(now, describe(event));
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    /// Log entries, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.iter()
    }
}

fn describe(event: &MeshEvent) -> String {
    match event {
        MeshEvent::LinkOpened { link, peer } => format!("{link} to {peer} open"),
        MeshEvent::LinkClosed { link, peer } => format!("{link} to {peer} closed"),
        MeshEvent::ParticipantJoined(peer) => format!("{peer} joined"),
        MeshEvent::ParticipantLeft(peer) => format!("{peer} left"),
        MeshEvent::Malformed { peer, reason } => format!("dropped malformed message from {peer}: {reason}"),
        MeshEvent::UnknownKind { peer, kind } => format!("ignored unknown message {kind} from {peer}"),
        MeshEvent::ArtifactRelayed { artifact_id, from } => format!("relayed artifact {artifact_id} from {from}"),
        MeshEvent::PeerUnavailable(peer) => format!("{peer} is unavailable"),
        MeshEvent::DuplicateLink { link, peer } => format!("closed duplicate link {link} to {peer}"),
    }
}

/// Everything a UI needs to draw the connection state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub status: ConnectionStatus,
    pub status_text: String,
    /// Assigned once the transport session opens.
    pub local_id: Option<PeerId>,
    /// Every participant, the local one included, ordered by identifier.
    pub participants: Vec<ParticipantRecord>,
    /// Open links.
    pub link_count: usize,
    pub counters: Counters,
    /// Oldest first.
    pub recent_events: Vec<LogEntry>,
    /// Nothing more will happen until the user reconnects, switches
    /// transport, or goes solo.
    pub needs_user_action: bool,
}

impl Snapshot {
    /// The snapshot before anything has started.
    pub fn initial() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            status_text: "Starting".to_string(),
            local_id: None,
            participants: Vec::new(),
            link_count: 0,
            counters: Counters::default(),
            recent_events: Vec::new(),
            needs_user_action: false,
        }
    }
}
