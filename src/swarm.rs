//! Swarm coordinator.
//!
//! Fans one torrent download out across many peers. Each peer gets its own
//! task running a [`PeerConnection`](crate::peer::PeerConnection); all of
//! them share a single [`PieceTracker`](crate::piece::PieceTracker), which
//! is what keeps two connections from fetching the same block.
//!
//! The download ends when the tracker reports every piece durable, or
//! fails with [`SwarmError::DownloadStalled`] once every connection has
//! closed without getting there.

mod coordinator;
mod endpoint;
mod error;

pub use coordinator::{Swarm, SwarmSummary};
pub use endpoint::PeerEndpoint;
pub use error::SwarmError;

#[cfg(test)]
mod tests;
