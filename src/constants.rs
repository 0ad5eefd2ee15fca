//! Protocol constants and tuning parameters.
//!
//! This module contains the fixed values of the peer wire protocol together
//! with the default tuning parameters used to build a [`SwarmConfig`].
//!
//! The tuning defaults follow what popular clients such as qBittorrent,
//! Transmission and libtorrent ship with.
//!
//! [`SwarmConfig`]: crate::config::SwarmConfig

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-SW0001-";

// ============================================================================
// Wire protocol
// ============================================================================

/// Protocol identifier carried in every handshake
pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// Length of a complete handshake: 1 + 19 + 8 + 20 + 20
pub const HANDSHAKE_LEN: usize = 68;

/// Size of the big-endian length prefix in front of every non-handshake message
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Canonical block size (16 KiB); every client in the wild accepts it
pub const BLOCK_SIZE: u32 = 16384;

/// Largest single message accepted from a peer.
/// A piece message carrying a 16 MiB block is the upper bound we tolerate.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024 + 13;

// ============================================================================
// Connection limits
// ============================================================================

/// Outstanding block requests per connection.
/// Five is the historical pipelining depth of the mainline client.
pub const MAX_IN_FLIGHT_REQUESTS: usize = 5;

/// Concurrently open peer connections for one torrent
pub const MAX_CONNECTIONS: usize = 50;

// ============================================================================
// Timeouts
// ============================================================================

/// TCP connect timeout for outgoing peer connections
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection with no inbound bytes for this long is closed.
/// Peers send keep-alives every two minutes at most.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Bound on a single outbound write draining
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Buffers
// ============================================================================

/// Initial capacity of the per-connection framing accumulator
pub const READ_BUFFER_CAPACITY: usize = 32 * 1024;
