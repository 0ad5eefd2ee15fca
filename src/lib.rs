//! swarmwire - A BitTorrent peer wire client engine
//!
//! Given a torrent's metadata and a list of candidate peers, this library
//! opens one connection per peer, speaks the BEP-3 peer wire protocol over
//! it, and assembles verified pieces into an output sink. All connections
//! share a single piece tracker, so no block is requested twice.
//!
//! # Modules
//!
//! - [`peer`] - Message codec, stream framing, request queue, connection state machine
//! - [`piece`] - Block bookkeeping and SHA-1 verification shared by all connections
//! - [`storage`] - Output sinks for verified pieces
//! - [`swarm`] - Fans a download out across many peers
//! - [`metainfo`] - The torrent metadata the engine consumes
//! - [`config`] - Runtime tuning
//!
//! # Example
//!
//! ```no_run
//! use swarmwire::{MemorySink, PeerEndpoint, Swarm, SwarmConfig, TorrentMetadata};
//! use std::sync::Arc;
//!
//! # async fn example(piece_hashes: Vec<[u8; 20]>) -> Result<(), Box<dyn std::error::Error>> {
//! let meta = TorrentMetadata::new([0xab; 20], 262_144, 1_048_576, piece_hashes)?;
//! let sink = Arc::new(MemorySink::new());
//!
//! let swarm = Swarm::new(Arc::new(meta), sink.clone(), SwarmConfig::default());
//! swarm.download(vec![PeerEndpoint::new("10.0.0.7", 6881)]).await?;
//!
//! let bytes = sink.assemble(1_048_576);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod storage;
pub mod swarm;

pub use config::SwarmConfig;
pub use metainfo::{MetainfoError, TorrentMetadata};
pub use peer::{
    Bitfield, ConnectionState, ConnectionStats, Handshake, Message, PeerConnection, PeerError,
    PeerId,
};
pub use piece::{BlockOutcome, BlockRequest, BlockState, PieceError, PieceTracker, RequesterId};
pub use storage::{FileSink, MemorySink, PieceSink, StorageError};
pub use swarm::{PeerEndpoint, Swarm, SwarmError, SwarmSummary};
