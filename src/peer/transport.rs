use super::error::PeerError;
use super::framer::{Frame, StreamFramer};
use super::message::{Handshake, Message};
use crate::constants::{IDLE_TIMEOUT, WRITE_TIMEOUT};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Owns a peer's byte stream and its framing accumulator.
///
/// Generic over the stream so the same code drives TCP sockets and the
/// in-memory pipes used in tests.
pub struct PeerTransport<S> {
    stream: S,
    framer: StreamFramer,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl<S> PeerTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            framer: StreamFramer::new(),
            read_timeout: IDLE_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, read_timeout: Duration, write_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.framer = self.framer.with_max_message_size(max);
        self
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        let data = handshake.encode();
        self.write_all(&data).await
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        let data = message.encode();
        self.write_all(&data).await
    }

    /// Waits for the next complete frame.
    ///
    /// A read that stays silent for longer than the read timeout fails with
    /// [`PeerError::Timeout`]; end of stream fails with
    /// [`PeerError::ConnectionLost`].
    pub async fn receive_frame(&mut self) -> Result<Frame, PeerError> {
        loop {
            if let Some(frame) = self.framer.next_frame()? {
                return Ok(frame);
            }

            let n = timeout(
                self.read_timeout,
                self.stream.read_buf(self.framer.buffer_mut()),
            )
            .await
            .map_err(|_| PeerError::Timeout)??;

            if n == 0 {
                return Err(PeerError::ConnectionLost);
            }
        }
    }

    /// Discards buffered input and shuts the write half down.
    pub async fn shutdown(&mut self) {
        self.framer.clear();
        let _ = timeout(self.write_timeout, self.stream.shutdown()).await;
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), PeerError> {
        timeout(self.write_timeout, self.stream.write_all(data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }
}
