//! Peer wire protocol (BEP-3).
//!
//! This module implements the download side of the base peer wire
//! protocol: the message codec, the framing of the inbound byte stream,
//! per-peer request scheduling and the connection state machine.
//!
//! # Layers
//!
//! - [`Handshake`] / [`Message`] - Fixed binary layouts, big-endian
//! - [`StreamFramer`] - Cuts whole frames out of partial and coalesced reads
//! - [`PeerTransport`] - Owns the stream and framer, applies timeouts
//! - [`PeerRequestQueue`] - Which blocks to ask this peer for next
//! - [`PeerConnection`] - Handshake, dispatch and pipelining for one peer

mod bitfield;
mod connection;
mod error;
mod framer;
mod message;
mod peer_id;
mod queue;
mod transport;

pub use bitfield::Bitfield;
pub use connection::{ConnectionState, ConnectionStats, PeerConnection, ProgressFn};
pub use error::PeerError;
pub use framer::{Frame, StreamFramer};
pub use message::{Handshake, Message, MessageId};
pub use peer_id::PeerId;
pub use queue::PeerRequestQueue;
pub use transport::PeerTransport;
