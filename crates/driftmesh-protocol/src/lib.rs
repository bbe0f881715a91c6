//! Wire protocol for driftmesh.
//!
//! This crate defines what travels over a link between two participants:
//!
//! - **Types** ([`Message`], [`ParticipantRecord`], [`Vec3`], etc.): the
//!   tagged union of link messages and their payloads.
//! - **Envelope** ([`encode_message`], [`decode_frame`], [`Inbound`]): the
//!   `{ "type": ..., "data": ... }` framing, with unknown kinds passed
//!   through as [`Inbound::Unknown`] so newer peers can talk to older ones.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes in, values out.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Mesh (links, roster, artifacts)
//! ```
//!
//! Decoding validates as well as parses, so a `Message` that comes out of
//! [`decode_frame`] is always safe to apply.

mod codec;
mod envelope;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use envelope::{decode_frame, encode_message, Inbound};
pub use error::ProtocolError;
pub use types::{
    ArtifactUpdate, Color, Message, ParticipantRecord, PositionUpdate,
    Recipient, RelayIntroduction, RosterRequest, Vec3,
};

pub use driftmesh_transport::PeerId;
