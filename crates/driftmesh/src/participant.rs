//! The single-threaded participant core.
//!
//! A [`Session`] owns the transport and every piece of state for one
//! participant. All methods are synchronous and take the current time as
//! an argument: the peer actor (see [`PeerBuilder`](crate::PeerBuilder)) calls them from its loop,
//! and tests call them directly while draining the transport's event
//! stream by hand.

use std::collections::VecDeque;
use std::time::Instant;

use driftmesh_mesh::{ArtifactPayload, Mesh};
use driftmesh_protocol::{PeerId, Vec3};
use driftmesh_session::{
    DestroyReason, LinkSupervisor, LocalIdentity, Locator, LocatorSink, Rendezvous, SupervisorCommand,
    SupervisorState,
};
use driftmesh_transport::{Transport, TransportEvent, TransportFault};

use crate::{Diagnostics, DriftmeshError, PeerConfig, Snapshot};

/// One participant: identity, rendezvous, supervisor, and mesh over a
/// transport.
pub struct Session<T: Transport> {
    transport: T,
    identity: LocalIdentity,
    rendezvous: Rendezvous,
    supervisor: LinkSupervisor,
    mesh: Mesh,
    diagnostics: Diagnostics,
    locator_sink: Option<Box<dyn LocatorSink>>,
    /// Last status text written to the event log.
    logged_status: String,
}

impl<T: Transport> Session<T> {
    /// Builds a session. Nothing happens until [`start`](Self::start).
    ///
    /// # Errors
    /// Returns [`DriftmeshError::Session`] if the configured locator is not
    /// a URL.
    pub fn new(transport: T, identity: LocalIdentity, config: PeerConfig, now: Instant) -> Result<Self, DriftmeshError> {
        let config = config.validated();
        let locator = Locator::parse(&config.locator)?;
        Ok(Self {
            transport,
            identity,
            rendezvous: Rendezvous::new(locator),
            supervisor: LinkSupervisor::new(config.supervisor),
            mesh: Mesh::new(config.mesh),
            diagnostics: Diagnostics::new(config.event_log_capacity, now),
            locator_sink: None,
            logged_status: String::new(),
        })
    }

    /// Publishes the rewritten locator here when this participant is the
    /// initiator.
    pub fn with_locator_sink(self, sink: impl LocatorSink) -> Self {
        self.with_boxed_locator_sink(Box::new(sink))
    }

    pub fn with_boxed_locator_sink(mut self, sink: Box<dyn LocatorSink>) -> Self {
        self.locator_sink = Some(sink);
        self
    }

    /// Opens the first transport session.
    pub fn start(&mut self, now: Instant) {
        tracing::info!(candidate = %self.identity.candidate, role = ?self.rendezvous.role(), "starting");
        let commands = self.supervisor.start(now);
        self.execute(commands, now);
        self.settle(now);
    }

    /// Feeds one transport event in.
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Open { epoch, id } => self.on_open(epoch, id, now),
            TransportEvent::Error { epoch, fault } => {
                let commands = self.supervisor.on_fault(epoch, &fault, now);
                if !matches!(fault, TransportFault::PeerUnavailable(_)) {
                    self.diagnostics.record(now, format!("transport fault: {fault}"));
                }
                self.execute(commands, now);
            }
            TransportEvent::Disconnected { epoch } => {
                let commands = self.supervisor.on_disconnected(epoch, now);
                self.execute(commands, now);
            }
            TransportEvent::Connection { link, remote } => {
                self.mesh.on_connection(&mut self.transport, link, remote);
            }
            TransportEvent::LinkOpen { link } => self.mesh.on_link_open(&mut self.transport, link),
            TransportEvent::Data { link, frame } => self.mesh.on_data(&mut self.transport, link, &frame, now),
            TransportEvent::LinkClosed { link } => self.mesh.on_link_closed(link),
            TransportEvent::LinkError { link, reason } => self.mesh.on_link_error(link, &reason),
        }
        self.settle(now);
    }

    /// Fires due timers and sends a held-back position update.
    pub fn poll(&mut self, now: Instant) {
        let commands = self.supervisor.poll(now);
        self.execute(commands, now);
        self.mesh.flush_position(&mut self.transport, now);
        self.settle(now);
    }

    /// When [`poll`](Self::poll) next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.supervisor.next_deadline(), self.mesh.position_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Periodic upkeep: re-dial missing locator targets while open and
    /// prune expired artifacts.
    pub fn health_check(&mut self, now: Instant) {
        if self.supervisor.state() == SupervisorState::Open {
            let targets = self.rendezvous.targets();
            self.mesh.rejoin(&mut self.transport, &targets, now);
        }
        self.mesh.prune(now);
        self.settle(now);
    }

    /// Moves the local participant.
    pub fn set_local_pose(&mut self, position: Vec3, rotation: f32, now: Instant) {
        if !position.is_finite() || !rotation.is_finite() {
            tracing::debug!("ignoring non-finite pose");
            return;
        }
        self.mesh.set_local_pose(&mut self.transport, position, rotation, now);
        self.settle(now);
    }

    /// Stores a local artifact edit and broadcasts it.
    ///
    /// # Errors
    /// Returns [`DriftmeshError::Mesh`] if `payload` is not an acceptable
    /// data URL.
    pub fn edit_artifact(&mut self, artifact_id: &str, payload: &str, now: Instant) -> Result<(), DriftmeshError> {
        self.mesh.edit_artifact(&mut self.transport, artifact_id, payload, now)?;
        self.settle(now);
        Ok(())
    }

    pub fn artifact(&self, artifact_id: &str, now: Instant) -> ArtifactPayload {
        self.mesh.artifact(artifact_id, now)
    }

    /// Starts over on the primary transport profile.
    pub fn request_reconnect(&mut self, now: Instant) {
        let commands = self.supervisor.request_reconnect(now);
        self.execute(commands, now);
        self.settle(now);
    }

    /// Switches to the alternate transport profile.
    pub fn request_alternate(&mut self, now: Instant) {
        let commands = self.supervisor.request_alternate(now);
        self.execute(commands, now);
        self.settle(now);
    }

    /// Drops every link and the transport session but keeps local state.
    pub fn go_solo(&mut self, now: Instant) {
        let commands = self.supervisor.go_solo();
        self.execute(commands, now);
        self.settle(now);
    }

    /// Closes every link, then the transport session. Idempotent.
    pub fn teardown(&mut self, now: Instant) {
        let commands = self.supervisor.teardown();
        self.execute(commands, now);
        self.settle(now);
    }

    pub fn is_torn_down(&self) -> bool {
        self.supervisor.state() == SupervisorState::Destroyed(DestroyReason::Teardown)
    }

    pub fn local_id(&self) -> Option<&PeerId> {
        self.mesh.local_id()
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn supervisor(&self) -> &LinkSupervisor {
        &self.supervisor
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The current state for display.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.supervisor.status(),
            status_text: self.supervisor.status_text(),
            local_id: self.mesh.local_id().cloned(),
            participants: self.mesh.participants(),
            link_count: self.mesh.link_count(),
            counters: self.diagnostics.counters(),
            recent_events: self.diagnostics.recent().cloned().collect(),
            needs_user_action: self.supervisor.needs_user_action(),
        }
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn on_open(&mut self, epoch: u64, id: PeerId, now: Instant) {
        if !self.supervisor.on_open(epoch) {
            return;
        }
        self.diagnostics.counters_mut().session_opens += 1;
        self.diagnostics.record(now, format!("session open as {id}"));

        self.mesh
            .on_session_open(self.identity.record(id.clone(), Vec3::ZERO, 0.0));
        let sink = self
            .locator_sink
            .as_mut()
            .map(|sink| &mut **sink as &mut dyn LocatorSink);
        let targets = self.rendezvous.on_open(&id, sink);
        if let Some(published) = self.rendezvous.published() {
            tracing::debug!(locator = %published, "share this locator to join");
        }
        self.mesh.join(&mut self.transport, &targets);
    }

    /// Runs supervisor commands against the transport. Opening can fail
    /// synchronously; that failure is fed back as a fault.
    fn execute(&mut self, commands: Vec<SupervisorCommand>, now: Instant) {
        let mut queue: VecDeque<SupervisorCommand> = commands.into();
        while let Some(command) = queue.pop_front() {
            match command {
                SupervisorCommand::Destroy => {
                    self.mesh.close_all(&mut self.transport);
                    self.transport.destroy();
                }
                SupervisorCommand::Open { epoch, profile } => {
                    tracing::debug!(epoch, profile = %profile.name, "opening transport session");
                    if let Err(e) = self.transport.open(epoch, &self.identity.candidate, &profile) {
                        tracing::warn!(epoch, error = %e, "transport open failed");
                        let fault = TransportFault::Other(e.to_string());
                        queue.extend(self.supervisor.on_fault(epoch, &fault, now));
                    }
                }
                SupervisorCommand::DropAttempt(peer) => self.mesh.on_peer_unavailable(&peer),
            }
        }
    }

    /// Moves mesh events and counters into diagnostics.
    fn settle(&mut self, now: Instant) {
        for event in self.mesh.drain_events() {
            self.diagnostics.record_mesh_event(now, &event);
        }
        let counters = self.diagnostics.counters_mut();
        counters.absorb_mesh(self.mesh.stats());
        counters.reconnect_attempts = self.supervisor.reconnect_attempts();
        counters.fallbacks = self.supervisor.fallbacks();

        let status = self.supervisor.status_text();
        if status != self.logged_status {
            self.diagnostics.record(now, status.clone());
            self.logged_status = status;
        }
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("candidate", &self.identity.candidate)
            .field("state", &self.supervisor.state())
            .field("mesh", &self.mesh)
            .finish()
    }
}
