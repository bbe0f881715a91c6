//! Peer actor: one Tokio task that owns a [`Session`].
//!
//! The actor is the only thing that touches the session. Transport
//! events, timers, the health check, and commands from [`PeerHandle`]s are
//! all serialized through one `select!` loop, so the session never sees
//! concurrent calls.

use std::time::{Duration, Instant};

use driftmesh_mesh::{ArtifactPayload, MeshConfig};
use driftmesh_protocol::Vec3;
use driftmesh_session::{LocalIdentity, LocatorSink, SupervisorConfig, SupervisorState};
use driftmesh_tick::{TickConfig, TickScheduler};
use driftmesh_transport::{event_channel, EventStream, MemoryNetwork, Transport};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{DriftmeshError, PeerConfig, Session, Snapshot};

/// Capacity of the command channel. Senders wait when it is full.
const COMMAND_CHANNEL_SIZE: usize = 64;

/// Commands sent to the actor through its channel.
enum PeerCommand {
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    SetPose {
        position: Vec3,
        rotation: f32,
    },
    EditArtifact {
        artifact_id: String,
        payload: String,
        reply: oneshot::Sender<Result<(), DriftmeshError>>,
    },
    Artifact {
        artifact_id: String,
        reply: oneshot::Sender<ArtifactPayload>,
    },
    RequestReconnect,
    RequestAlternate,
    GoSolo,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// The clock the actor runs on. Tokio's clock, so paused-time tests work.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running peer. Cheap to clone.
#[derive(Clone)]
pub struct PeerHandle {
    commands: mpsc::Sender<PeerCommand>,
    snapshots: watch::Receiver<Snapshot>,
}

impl PeerHandle {
    /// The current state.
    pub async fn snapshot(&self) -> Result<Snapshot, DriftmeshError> {
        let (reply, rx) = oneshot::channel();
        self.send(PeerCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| DriftmeshError::Stopped)
    }

    /// A receiver that sees every published snapshot.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Moves the local participant (fire-and-forget).
    pub async fn set_pose(&self, position: Vec3, rotation: f32) -> Result<(), DriftmeshError> {
        self.send(PeerCommand::SetPose { position, rotation }).await
    }

    /// Edits a shared artifact and broadcasts it.
    pub async fn edit_artifact(&self, artifact_id: impl Into<String>, payload: impl Into<String>) -> Result<(), DriftmeshError> {
        let (reply, rx) = oneshot::channel();
        self.send(PeerCommand::EditArtifact {
            artifact_id: artifact_id.into(),
            payload: payload.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| DriftmeshError::Stopped)?
    }

    /// The live payload for an artifact (blank if absent or expired).
    pub async fn artifact(&self, artifact_id: impl Into<String>) -> Result<ArtifactPayload, DriftmeshError> {
        let (reply, rx) = oneshot::channel();
        self.send(PeerCommand::Artifact {
            artifact_id: artifact_id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| DriftmeshError::Stopped)
    }

    /// Starts over on the primary transport profile.
    pub async fn request_reconnect(&self) -> Result<(), DriftmeshError> {
        self.send(PeerCommand::RequestReconnect).await
    }

    /// Switches to the alternate transport profile.
    pub async fn request_alternate_transport(&self) -> Result<(), DriftmeshError> {
        self.send(PeerCommand::RequestAlternate).await
    }

    /// Leaves the mesh but keeps running locally.
    pub async fn go_solo(&self) -> Result<(), DriftmeshError> {
        self.send(PeerCommand::GoSolo).await
    }

    /// Tears the peer down and waits for the actor to stop. Calling it
    /// again after the peer stopped is a no-op.
    pub async fn shutdown(&self) -> Result<(), DriftmeshError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(PeerCommand::Shutdown { reply }).await.is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    /// Whether the actor is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn send(&self, command: PeerCommand) -> Result<(), DriftmeshError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DriftmeshError::Stopped)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct PeerActor<T: Transport> {
    session: Session<T>,
    events: EventStream,
    commands: mpsc::Receiver<PeerCommand>,
    health: TickScheduler,
    snapshots: watch::Sender<Snapshot>,
}

enum Flow {
    Continue,
    Stop,
}

impl<T: Transport> PeerActor<T> {
    async fn run(mut self) {
        tracing::info!("peer actor started");
        self.session.start(now());
        self.publish();

        loop {
            let deadline = self.session.next_deadline();
            tokio::select! {
                command = self.commands.recv() => {
                    let flow = match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            tracing::debug!("all handles dropped");
                            self.session.teardown(now());
                            Flow::Stop
                        }
                    };
                    if let Flow::Stop = flow {
                        break;
                    }
                }
                Some(event) = self.events.recv() => {
                    self.session.handle_event(event, now());
                }
                () = sleep_until(deadline) => {
                    self.session.poll(now());
                }
                _ = self.health.wait_for_tick() => {
                    self.session.health_check(now());
                }
            }
            self.sync_health();
            self.publish();
        }

        self.publish();
        tracing::info!("peer actor stopped");
    }

    fn handle_command(&mut self, command: PeerCommand) -> Flow {
        match command {
            PeerCommand::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            PeerCommand::SetPose { position, rotation } => {
                self.session.set_local_pose(position, rotation, now());
            }
            PeerCommand::EditArtifact {
                artifact_id,
                payload,
                reply,
            } => {
                let result = self.session.edit_artifact(&artifact_id, &payload, now());
                let _ = reply.send(result);
            }
            PeerCommand::Artifact { artifact_id, reply } => {
                let _ = reply.send(self.session.artifact(&artifact_id, now()));
            }
            PeerCommand::RequestReconnect => self.session.request_reconnect(now()),
            PeerCommand::RequestAlternate => self.session.request_alternate(now()),
            PeerCommand::GoSolo => self.session.go_solo(now()),
            PeerCommand::Shutdown { reply } => {
                self.session.teardown(now());
                self.publish();
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Health checks only matter while the supervisor may still reach a
    /// session. Solo and given-up peers wait for a user command instead.
    fn sync_health(&mut self) {
        if matches!(self.session.supervisor().state(), SupervisorState::Destroyed(_)) {
            self.health.pause();
        } else {
            self.health.resume();
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and spawning a peer.
///
/// # Example
///
/// ```rust,no_run
/// use driftmesh::prelude::*;
///
/// # async fn run() -> Result<(), DriftmeshError> {
/// let network = MemoryNetwork::new();
/// let peer = PeerBuilder::new()
///     .username("ada")
///     .locator("https://mesh.example/space?p=host1")
///     .spawn_memory(&network)?;
/// let snapshot = peer.snapshot().await?;
/// println!("{}", snapshot.status_text);
/// # Ok(())
/// # }
/// ```
pub struct PeerBuilder {
    config: PeerConfig,
    identity: Option<LocalIdentity>,
    locator_sink: Option<Box<dyn LocatorSink>>,
}

impl PeerBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            config: PeerConfig::default(),
            identity: None,
            locator_sink: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    pub fn locator(mut self, locator: impl Into<String>) -> Self {
        self.config.locator = locator.into();
        self
    }

    pub fn supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.config.supervisor = supervisor;
        self
    }

    pub fn mesh(mut self, mesh: MeshConfig) -> Self {
        self.config.mesh = mesh;
        self
    }

    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.config.health_interval = interval;
        self
    }

    pub fn event_log_capacity(mut self, capacity: usize) -> Self {
        self.config.event_log_capacity = capacity;
        self
    }

    /// Uses a fixed identity instead of generating one.
    pub fn identity(mut self, identity: LocalIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Where an initiator publishes the locator others should join with.
    pub fn locator_sink(mut self, sink: impl LocatorSink) -> Self {
        self.locator_sink = Some(Box::new(sink));
        self
    }

    /// Spawns the peer over `transport`, whose events arrive on `events`.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`DriftmeshError::Session`] if the locator is not a URL.
    pub fn spawn<T: Transport>(self, transport: T, events: EventStream) -> Result<PeerHandle, DriftmeshError> {
        let config = self.config.validated();
        let identity = self
            .identity
            .unwrap_or_else(|| LocalIdentity::generate(config.username.clone()));
        let health = TickScheduler::new(TickConfig {
            initial_jitter: Duration::ZERO,
            ..TickConfig::every(config.health_interval)
        });

        let mut session = Session::new(transport, identity, config, now())?;
        if let Some(sink) = self.locator_sink {
            session = session.with_boxed_locator_sink(sink);
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::initial());
        let actor = PeerActor {
            session,
            events,
            commands: command_rx,
            health,
            snapshots: snapshot_tx,
        };
        tokio::spawn(actor.run());

        Ok(PeerHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        })
    }

    /// Spawns the peer on an in-process network.
    ///
    /// # Errors
    /// Returns [`DriftmeshError::Session`] if the locator is not a URL.
    pub fn spawn_memory(self, network: &MemoryNetwork) -> Result<PeerHandle, DriftmeshError> {
        let (sink, events) = event_channel();
        let transport = network.endpoint(sink);
        self.spawn(transport, events)
    }

    /// Spawns the peer against the WebSocket relay named by the
    /// supervisor's transport profiles.
    ///
    /// # Errors
    /// Returns [`DriftmeshError::Session`] if the locator is not a URL.
    #[cfg(feature = "websocket")]
    pub fn spawn_relay(self) -> Result<PeerHandle, DriftmeshError> {
        let (sink, events) = event_channel();
        let transport = driftmesh_transport::RelayTransport::new(sink);
        self.spawn(transport, events)
    }
}

impl Default for PeerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
