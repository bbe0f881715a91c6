//! The participant side of the relay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::frame::RelayFrame;
use crate::{
    EventSink, LinkId, PeerId, Transport, TransportError, TransportEvent,
    TransportFault, TransportProfile,
};

/// A [`Transport`] that reaches other participants through a
/// [`RelayServer`](super::RelayServer).
///
/// Each `open` spawns a driver task that owns the WebSocket. Calls on the
/// transport only enqueue work for that task, so they never block.
pub struct RelayTransport {
    events: EventSink,
    driver: Option<Driver>,
}

/// Handle to the task serving one session epoch.
struct Driver {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

enum Command {
    Dial { link: LinkId, to: PeerId },
    Send { link: LinkId, payload: String },
    Close { link: LinkId },
}

impl RelayTransport {
    /// Creates a relay transport that reports into `events`.
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            driver: None,
        }
    }

    /// Picks the relay URL for a profile: the pinned host if it is a
    /// WebSocket URL, otherwise the first WebSocket relay entry.
    pub fn relay_url(profile: &TransportProfile) -> Option<String> {
        let is_ws = |url: &str| url.starts_with("ws://") || url.starts_with("wss://");
        profile
            .pinned_host
            .iter()
            .map(String::as_str)
            .chain(profile.relays.iter().map(|relay| relay.url.as_str()))
            .find(|url| is_ws(url))
            .map(str::to_string)
    }

    fn command(&self, command: Command) -> Result<(), TransportError> {
        let driver = self.driver.as_ref().ok_or(TransportError::NotOpen)?;
        driver
            .commands
            .send(command)
            .map_err(|_| TransportError::Shutdown)
    }
}

impl Transport for RelayTransport {
    fn open(
        &mut self,
        epoch: u64,
        candidate: &PeerId,
        profile: &TransportProfile,
    ) -> Result<(), TransportError> {
        self.destroy();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| TransportError::NoRuntime)?;
        let alive = Arc::new(AtomicBool::new(true));
        let emitter = Emitter {
            epoch,
            events: self.events.clone(),
            alive: Arc::clone(&alive),
        };

        let Some(url) = Self::relay_url(profile) else {
            emitter.emit(TransportEvent::Error {
                epoch,
                fault: TransportFault::Other(format!(
                    "profile {} has no relay endpoint",
                    profile.name
                )),
            });
            return Ok(());
        };

        let (commands, commands_rx) = mpsc::unbounded_channel();
        tracing::debug!(%url, epoch, profile = %profile.name, "relay transport: opening");
        let task = runtime.spawn(drive(url, candidate.clone(), emitter, commands_rx));
        self.driver = Some(Driver {
            commands,
            task,
            alive,
        });
        Ok(())
    }

    fn connect(&mut self, remote: &PeerId) -> Result<LinkId, TransportError> {
        let link = LinkId::fresh();
        self.command(Command::Dial {
            link,
            to: remote.clone(),
        })?;
        Ok(link)
    }

    fn send(&mut self, link: LinkId, frame: Vec<u8>) -> Result<(), TransportError> {
        let payload =
            String::from_utf8(frame).map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.command(Command::Send { link, payload })
    }

    fn close_link(&mut self, link: LinkId) {
        let _ = self.command(Command::Close { link });
    }

    fn destroy(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.alive.store(false, Ordering::Release);
            driver.task.abort();
        }
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

/// Pushes events for one epoch until the session is destroyed.
struct Emitter {
    epoch: u64,
    events: EventSink,
    alive: Arc<AtomicBool>,
}

impl Emitter {
    fn emit(&self, event: TransportEvent) {
        if self.alive.load(Ordering::Acquire) {
            let _ = self.events.send(event);
        }
    }
}

/// Link bookkeeping for one session.
#[derive(Default)]
struct Channels {
    by_link: HashMap<LinkId, u64>,
    by_channel: HashMap<u64, LinkId>,
    /// Dials awaiting `Dialed`, keyed by request number.
    pending: HashMap<u64, LinkId>,
}

impl Channels {
    fn bind(&mut self, link: LinkId, channel: u64) {
        self.by_link.insert(link, channel);
        self.by_channel.insert(channel, link);
    }

    fn unbind_channel(&mut self, channel: u64) -> Option<LinkId> {
        let link = self.by_channel.remove(&channel)?;
        self.by_link.remove(&link);
        Some(link)
    }

    fn unbind_link(&mut self, link: LinkId) -> Option<u64> {
        let channel = self.by_link.remove(&link)?;
        self.by_channel.remove(&channel);
        Some(channel)
    }
}

async fn drive(
    url: String,
    candidate: PeerId,
    emitter: Emitter,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let epoch = emitter.epoch;
    let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            tracing::debug!(%url, error = %e, "relay transport: connect failed");
            emitter.emit(TransportEvent::Error {
                epoch,
                fault: TransportFault::Network(e.to_string()),
            });
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    if let Some(msg) = (RelayFrame::Register { candidate }).to_message() {
        if let Err(e) = sink.send(msg).await {
            emitter.emit(TransportEvent::Error {
                epoch,
                fault: TransportFault::Network(e.to_string()),
            });
            return;
        }
    }

    let mut channels = Channels::default();

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    let _ = sink.close().await;
                    return;
                };
                let frame = match command {
                    Command::Dial { link, to } => {
                        channels.pending.insert(link.into_inner(), link);
                        Some(RelayFrame::Dial { request: link.into_inner(), to })
                    }
                    Command::Send { link, payload } => match channels.by_link.get(&link) {
                        Some(&channel) => Some(RelayFrame::Data { channel, payload }),
                        None => {
                            emitter.emit(TransportEvent::LinkError {
                                link,
                                reason: "link is not open".to_string(),
                            });
                            None
                        }
                    },
                    Command::Close { link } => {
                        let channel = channels.unbind_link(link);
                        if channels.pending.remove(&link.into_inner()).is_some() || channel.is_some() {
                            emitter.emit(TransportEvent::LinkClosed { link });
                        }
                        channel.map(|channel| RelayFrame::Close { channel })
                    }
                };
                if let Some(msg) = frame.and_then(|frame| frame.to_message()) {
                    if sink.send(msg).await.is_err() {
                        break;
                    }
                }
            }
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) if msg.is_close() => break,
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "relay transport: read failed");
                        break;
                    }
                    None => break,
                };
                let Some(frame) = RelayFrame::from_message(&msg) else {
                    continue;
                };
                match frame {
                    RelayFrame::Registered { id } => {
                        emitter.emit(TransportEvent::Open { epoch, id });
                    }
                    RelayFrame::Dialed { request, channel } => {
                        if let Some(link) = channels.pending.remove(&request) {
                            channels.bind(link, channel);
                            emitter.emit(TransportEvent::LinkOpen { link });
                        } else if let Some(msg) = (RelayFrame::Close { channel }).to_message() {
                            // Dial was cancelled locally before it completed.
                            let _ = sink.send(msg).await;
                        }
                    }
                    RelayFrame::Unavailable { request, to } => {
                        channels.pending.remove(&request);
                        emitter.emit(TransportEvent::Error {
                            epoch,
                            fault: TransportFault::PeerUnavailable(to),
                        });
                    }
                    RelayFrame::Incoming { channel, from } => {
                        let link = LinkId::fresh();
                        channels.bind(link, channel);
                        emitter.emit(TransportEvent::Connection { link, remote: from });
                        emitter.emit(TransportEvent::LinkOpen { link });
                    }
                    RelayFrame::Data { channel, payload } => {
                        if let Some(&link) = channels.by_channel.get(&channel) {
                            emitter.emit(TransportEvent::Data { link, frame: payload.into_bytes() });
                        }
                    }
                    RelayFrame::Close { channel } => {
                        if let Some(link) = channels.unbind_channel(channel) {
                            emitter.emit(TransportEvent::LinkClosed { link });
                        }
                    }
                    RelayFrame::Fault { message } => {
                        emitter.emit(TransportEvent::Error {
                            epoch,
                            fault: TransportFault::ServerError(message),
                        });
                    }
                    RelayFrame::Register { .. } | RelayFrame::Dial { .. } => {}
                }
            }
        }
    }

    // The relay went away: every link dies with it.
    for link in channels.by_link.into_keys() {
        emitter.emit(TransportEvent::LinkClosed { link });
    }
    emitter.emit(TransportEvent::Disconnected { epoch });
}
