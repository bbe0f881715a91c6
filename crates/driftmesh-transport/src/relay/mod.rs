//! WebSocket rendezvous relay.
//!
//! The relay is a small signaling-and-forwarding service: participants
//! register an identifier, dial each other by identifier, and the relay
//! forwards link traffic between them over one WebSocket per participant.
//!
//! - [`RelayServer`] accepts participants and routes frames
//! - [`RelayTransport`] is the [`Transport`](crate::Transport) side that
//!   talks to a relay

mod client;
mod frame;
mod server;

pub use client::RelayTransport;
pub use server::RelayServer;
