//! Runtime configuration for a swarm download.

use crate::constants::{
    BLOCK_SIZE, CONNECT_TIMEOUT, IDLE_TIMEOUT, MAX_CONNECTIONS, MAX_IN_FLIGHT_REQUESTS,
    MAX_MESSAGE_SIZE, WRITE_TIMEOUT,
};
use std::time::Duration;

/// Tuning knobs shared by the swarm coordinator and its connections.
///
/// # Examples
///
/// ```
/// use swarmwire::SwarmConfig;
/// use std::time::Duration;
///
/// let config = SwarmConfig::default()
///     .with_max_connections(8)
///     .with_idle_timeout(Duration::from_secs(30));
///
/// assert_eq!(config.max_connections, 8);
/// assert_eq!(config.block_size, 16384);
/// ```
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Size of the blocks pieces are split into.
    pub block_size: u32,
    /// Requests allowed in flight on one connection.
    pub max_in_flight: usize,
    /// Connections open at the same time; remaining endpoints wait for a slot.
    pub max_connections: usize,
    /// Timeout for dialing a peer.
    pub connect_timeout: Duration,
    /// A connection silent for this long is closed.
    pub idle_timeout: Duration,
    /// Timeout for an outbound write to drain.
    pub write_timeout: Duration,
    /// Largest length prefix accepted from a peer.
    pub max_message_size: usize,
    /// Revert the blocks a closed connection still had Requested back to Needed.
    pub release_on_close: bool,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            max_in_flight: MAX_IN_FLIGHT_REQUESTS,
            max_connections: MAX_CONNECTIONS,
            connect_timeout: CONNECT_TIMEOUT,
            idle_timeout: IDLE_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
            release_on_close: true,
        }
    }
}

impl SwarmConfig {
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_release_on_close(mut self, release: bool) -> Self {
        self.release_on_close = release;
        self
    }
}
