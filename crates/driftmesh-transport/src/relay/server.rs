//! The relay service.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use super::frame::RelayFrame;
use crate::{PeerId, TransportError};

/// A WebSocket relay that registers participants and forwards link
/// traffic between them.
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<Mutex<RelayState>>,
}

/// Routing table shared by every client task.
#[derive(Default)]
struct RelayState {
    clients: HashMap<PeerId, mpsc::UnboundedSender<RelayFrame>>,
    /// Channel id -> the two participants it joins.
    channels: HashMap<u64, (PeerId, PeerId)>,
    next_channel: u64,
}

impl RelayState {
    fn register(&mut self, candidate: &PeerId, outbound: mpsc::UnboundedSender<RelayFrame>) -> PeerId {
        let id = if self.clients.contains_key(candidate) || candidate.is_empty() {
            (2u32..)
                .map(|n| PeerId::new(format!("{candidate}-{n}")))
                .find(|id| !self.clients.contains_key(id))
                .unwrap_or_else(|| candidate.clone())
        } else {
            candidate.clone()
        };
        self.clients.insert(id.clone(), outbound);
        id
    }

    fn deliver(&self, to: &PeerId, frame: RelayFrame) {
        if let Some(outbound) = self.clients.get(to) {
            let _ = outbound.send(frame);
        }
    }

    /// The participant on the other end of `channel` from `me`.
    fn far_end(&self, channel: u64, me: &PeerId) -> Option<&PeerId> {
        let (a, b) = self.channels.get(&channel)?;
        if a == me {
            Some(b)
        } else if b == me {
            Some(a)
        } else {
            None
        }
    }

    fn handle(&mut self, me: &PeerId, frame: RelayFrame) {
        match frame {
            RelayFrame::Dial { request, to } => {
                if self.clients.contains_key(&to) && &to != me {
                    self.next_channel += 1;
                    let channel = self.next_channel;
                    self.channels.insert(channel, (me.clone(), to.clone()));
                    self.deliver(me, RelayFrame::Dialed { request, channel });
                    self.deliver(
                        &to,
                        RelayFrame::Incoming {
                            channel,
                            from: me.clone(),
                        },
                    );
                    tracing::debug!(%me, %to, channel, "relay: channel opened");
                } else {
                    self.deliver(me, RelayFrame::Unavailable { request, to });
                }
            }
            RelayFrame::Data { channel, payload } => {
                if let Some(to) = self.far_end(channel, me).cloned() {
                    self.deliver(&to, RelayFrame::Data { channel, payload });
                }
            }
            RelayFrame::Close { channel } => {
                if let Some(to) = self.far_end(channel, me).cloned() {
                    self.channels.remove(&channel);
                    self.deliver(&to, RelayFrame::Close { channel });
                }
            }
            other => {
                tracing::debug!(%me, ?other, "relay: unexpected frame from client");
                self.deliver(
                    me,
                    RelayFrame::Fault {
                        message: "unexpected frame".to_string(),
                    },
                );
            }
        }
    }

    /// Forgets `me` and closes every channel it was part of.
    fn unregister(&mut self, me: &PeerId) {
        self.clients.remove(me);
        let owned: Vec<(u64, PeerId)> = self
            .channels
            .iter()
            .filter_map(|(channel, (a, b))| {
                if a == me {
                    Some((*channel, b.clone()))
                } else if b == me {
                    Some((*channel, a.clone()))
                } else {
                    None
                }
            })
            .collect();
        for (channel, other) in owned {
            self.channels.remove(&channel);
            self.deliver(&other, RelayFrame::Close { channel });
        }
    }
}

impl RelayServer {
    /// Binds a new relay to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        tracing::info!(addr, "relay listening");
        Ok(Self {
            listener,
            state: Arc::new(Mutex::new(RelayState::default())),
        })
    }

    /// The address the relay is actually bound to (useful after binding
    /// port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::BindFailed)
    }

    /// Accepts participants until the listener fails.
    ///
    /// Each participant is served on its own task.
    pub async fn run(self) -> Result<(), TransportError> {
        loop {
            let (stream, addr) = self
                .listener
                .accept()
                .await
                .map_err(TransportError::AcceptFailed)?;
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(e) = serve_client(stream, state).await {
                    tracing::debug!(%addr, error = %e, "relay client ended with error");
                }
            });
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    state: Arc<Mutex<RelayState>>,
) -> Result<(), TransportError> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| TransportError::ConnectionClosed(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    // The first frame must be a registration.
    let candidate = loop {
        match stream.next().await {
            Some(Ok(msg)) => match RelayFrame::from_message(&msg) {
                Some(RelayFrame::Register { candidate }) => break candidate,
                Some(_) => {
                    return Err(TransportError::ConnectionClosed(
                        "frame before registration".to_string(),
                    ));
                }
                None => continue,
            },
            Some(Err(e)) => return Err(TransportError::ConnectionClosed(e.to_string())),
            None => return Ok(()),
        }
    };

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<RelayFrame>();
    let id = state.lock().await.register(&candidate, outbound.clone());
    tracing::info!(%id, "relay: participant registered");
    let _ = outbound.send(RelayFrame::Registered { id: id.clone() });

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let Some(msg) = frame.to_message() else {
                continue;
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(msg) if msg.is_close() => break,
            Ok(msg) => {
                if let Some(frame) = RelayFrame::from_message(&msg) {
                    state.lock().await.handle(&id, frame);
                }
            }
            Err(e) => {
                tracing::debug!(%id, error = %e, "relay: read failed");
                break;
            }
        }
    }

    state.lock().await.unregister(&id);
    drop(outbound);
    writer.abort();
    tracing::info!(%id, "relay: participant left");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(state: &mut RelayState, name: &str) -> (PeerId, mpsc::UnboundedReceiver<RelayFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.register(&PeerId::from(name), tx);
        (id, rx)
    }

    #[test]
    fn test_register_suffixes_taken_identifier() {
        let mut state = RelayState::default();
        let (first, _a) = client(&mut state, "host1");
        let (second, _b) = client(&mut state, "host1");
        assert_eq!(first.as_str(), "host1");
        assert_eq!(second.as_str(), "host1-2");
    }

    #[test]
    fn test_dial_unknown_peer_reports_unavailable() {
        let mut state = RelayState::default();
        let (me, mut rx) = client(&mut state, "a");
        state.handle(
            &me,
            RelayFrame::Dial {
                request: 1,
                to: PeerId::from("ghost"),
            },
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            RelayFrame::Unavailable {
                request: 1,
                to: PeerId::from("ghost")
            }
        );
    }

    #[test]
    fn test_unregister_closes_channels_for_far_end() {
        let mut state = RelayState::default();
        let (a, _rx_a) = client(&mut state, "a");
        let (b, mut rx_b) = client(&mut state, "b");
        state.handle(&a, RelayFrame::Dial { request: 1, to: b.clone() });
        let Ok(RelayFrame::Incoming { channel, .. }) = rx_b.try_recv() else {
            panic!("expected incoming channel");
        };

        state.unregister(&a);
        assert_eq!(rx_b.try_recv().unwrap(), RelayFrame::Close { channel });
        assert!(state.channels.is_empty());
    }
}
