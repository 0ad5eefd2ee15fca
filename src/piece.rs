//! Piece and block bookkeeping.
//!
//! A torrent is split into pieces, each independently verified against a
//! SHA-1 digest, and every piece into blocks of at most 16 KiB, the unit
//! actually requested from peers.
//!
//! # Block lifecycle
//!
//! ```text
//! Needed --request--> Requested --piece--> Received
//!    ^                    |                    |
//!    +------release-------+                    |
//!    +------------digest mismatch--------------+
//! ```
//!
//! [`PieceTracker`] owns these states for a whole torrent and is shared by
//! every connection downloading it.

mod block;
mod error;
mod tracker;

pub use block::{compute_block_count, compute_block_length, BlockRequest, BlockState};
pub use error::PieceError;
pub use tracker::{BlockOutcome, PieceTracker, RequesterId};

#[cfg(test)]
mod tests;
