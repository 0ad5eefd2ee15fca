use crate::piece::PieceError;
use thiserror::Error;

/// Errors that can occur during peer communication.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The handshake bytes do not carry the expected protocol identifier.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer's first message was not an acceptable handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A message is shorter than its id requires.
    #[error("truncated payload for message {id}: expected {expected} bytes, got {actual}")]
    TruncatedPayload {
        id: u8,
        expected: usize,
        actual: usize,
    },

    /// Received an unknown message ID.
    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    /// The length prefix announces more than we are willing to buffer.
    #[error("message too large: {0}")]
    MessageTooLarge(usize),

    /// The connection was closed by the peer.
    #[error("connection lost")]
    ConnectionLost,

    /// Operation timed out.
    #[error("timeout")]
    Timeout,

    /// The piece tracker refused an update.
    #[error("piece error: {0}")]
    Piece(#[from] PieceError),
}

impl PeerError {
    /// Errors after which the byte stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PeerError::InvalidMessageId(_) | PeerError::Piece(_))
    }
}
