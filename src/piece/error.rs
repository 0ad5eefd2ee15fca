use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised by the piece tracker for a single block or piece.
#[derive(Debug, Error)]
pub enum PieceError {
    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("invalid block offset: piece {piece}, offset {offset}")]
    InvalidBlockOffset { piece: u32, offset: u32 },

    /// The block's length does not match the piece geometry.
    #[error("block length mismatch: piece {piece}, offset {offset}, expected {expected}, got {actual}")]
    BlockLengthMismatch {
        piece: u32,
        offset: u32,
        expected: u32,
        actual: usize,
    },

    /// A verified piece could not be handed to the sink.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
