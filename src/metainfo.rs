//! Torrent metadata consumed by the engine.
//!
//! Parsing `.torrent` files is left to the caller. The engine only needs the
//! info hash, the piece geometry and the per-piece SHA-1 digests, validated
//! once here so every other component can rely on them.
//!
//! # Examples
//!
//! ```
//! use swarmwire::TorrentMetadata;
//!
//! # fn main() -> Result<(), swarmwire::MetainfoError> {
//! let meta = TorrentMetadata::new([0u8; 20], 16, 24, vec![[0u8; 20]; 2])?;
//!
//! assert_eq!(meta.piece_count(), 2);
//! assert_eq!(meta.piece_len(0), 16);
//! assert_eq!(meta.piece_len(1), 8);
//! assert_eq!(meta.piece_offset(1), 16);
//! # Ok(())
//! # }
//! ```

use sha1::{Digest, Sha1};
use std::fmt;
use thiserror::Error;

/// Errors raised when metadata handed to the engine is inconsistent.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The piece length is zero.
    #[error("piece length must be positive")]
    ZeroPieceLength,

    /// The torrent has no data.
    #[error("total length must be positive")]
    ZeroTotalLength,

    /// The number of digests does not match the piece geometry.
    #[error("expected {expected} piece hashes, got {actual}")]
    PieceCountMismatch { expected: usize, actual: usize },

    /// The geometry produces more pieces than a wire index can address.
    #[error("too many pieces: {0}")]
    TooManyPieces(u64),
}

/// Validated, read-only description of a single torrent.
#[derive(Clone, PartialEq, Eq)]
pub struct TorrentMetadata {
    info_hash: [u8; 20],
    piece_length: u64,
    total_length: u64,
    piece_hashes: Vec<[u8; 20]>,
}

impl TorrentMetadata {
    pub fn new(
        info_hash: [u8; 20],
        piece_length: u64,
        total_length: u64,
        piece_hashes: Vec<[u8; 20]>,
    ) -> Result<Self, MetainfoError> {
        if piece_length == 0 {
            return Err(MetainfoError::ZeroPieceLength);
        }
        if total_length == 0 {
            return Err(MetainfoError::ZeroTotalLength);
        }

        let expected = total_length.div_ceil(piece_length);
        if expected > u32::MAX as u64 {
            return Err(MetainfoError::TooManyPieces(expected));
        }
        if piece_hashes.len() as u64 != expected {
            return Err(MetainfoError::PieceCountMismatch {
                expected: expected as usize,
                actual: piece_hashes.len(),
            });
        }

        Ok(Self {
            info_hash,
            piece_length,
            total_length,
            piece_hashes,
        })
    }

    /// Builds metadata for `data`, hashing every piece. Mostly useful for
    /// seeding test peers and for fixtures.
    pub fn from_data(
        info_hash: [u8; 20],
        piece_length: u64,
        data: &[u8],
    ) -> Result<Self, MetainfoError> {
        if piece_length == 0 {
            return Err(MetainfoError::ZeroPieceLength);
        }
        let hashes = data
            .chunks(piece_length as usize)
            .map(|chunk| Sha1::digest(chunk).into())
            .collect();
        Self::new(info_hash, piece_length, data.len() as u64, hashes)
    }

    pub fn info_hash(&self) -> &[u8; 20] {
        &self.info_hash
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Length of the piece at `index`; only the last piece may be short.
    pub fn piece_len(&self, index: u32) -> u64 {
        let offset = self.piece_offset(index);
        self.total_length
            .saturating_sub(offset)
            .min(self.piece_length)
    }

    /// Byte offset of the piece inside the torrent's data.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length
    }

    pub fn piece_hash(&self, index: u32) -> Option<&[u8; 20]> {
        self.piece_hashes.get(index as usize)
    }

    /// Checks assembled piece bytes against the digest from the metadata.
    pub fn verify_piece(&self, index: u32, data: &[u8]) -> bool {
        match self.piece_hash(index) {
            Some(expected) => {
                let actual: [u8; 20] = Sha1::digest(data).into();
                &actual == expected
            }
            None => false,
        }
    }

    pub fn info_hash_hex(&self) -> String {
        hex_encode(&self.info_hash)
    }
}

impl fmt::Debug for TorrentMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorrentMetadata")
            .field("info_hash", &self.info_hash_hex())
            .field("piece_length", &self.piece_length)
            .field("total_length", &self.total_length)
            .field("pieces", &self.piece_hashes.len())
            .finish()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
        s
    })
}
