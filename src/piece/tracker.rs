use super::block::{compute_block_count, compute_block_length, BlockRequest, BlockState};
use super::error::PieceError;
use crate::metainfo::TorrentMetadata;
use crate::storage::PieceSink;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// What became of a block handed to [`PieceTracker::mark_received`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Stored; the piece still misses other blocks.
    Accepted,
    /// The block was already received; nothing changed.
    Duplicate,
    /// The block completed the piece, which passed verification and was
    /// written to the sink.
    Verified(u32),
    /// The block completed the piece but its digest did not match. Every
    /// block of the piece is Needed again.
    Corrupt(u32),
}

/// Who holds a Requested block.
///
/// A connection registers once with [`PieceTracker::register_requester`]
/// and reserves blocks under that id, so on close it only hands back blocks
/// it still holds: a block reset by a failed digest and re-reserved by
/// another connection stays with the new holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequesterId(u64);

impl RequesterId {
    /// Holder of blocks claimed without an id, e.g. via
    /// [`PieceTracker::mark_requested`].
    pub const ANONYMOUS: RequesterId = RequesterId(0);
}

struct PieceProgress {
    blocks: Vec<BlockState>,
    holders: Vec<RequesterId>,
    length: u64,
    buffer: Vec<u8>,
    received: usize,
    durable: bool,
}

impl PieceProgress {
    fn new(length: u64, block_size: u32) -> Self {
        let count = compute_block_count(length, block_size) as usize;
        Self {
            blocks: vec![BlockState::Needed; count],
            holders: vec![RequesterId::ANONYMOUS; count],
            length,
            buffer: Vec::new(),
            received: 0,
            durable: false,
        }
    }

    fn is_needed(&self) -> bool {
        !self.durable && self.blocks.contains(&BlockState::Needed)
    }

    fn reset(&mut self) {
        self.blocks.fill(BlockState::Needed);
        self.holders.fill(RequesterId::ANONYMOUS);
        self.buffer = Vec::new();
        self.received = 0;
    }
}

struct TrackerState {
    pieces: Vec<PieceProgress>,
    durable_pieces: usize,
    durable_bytes: u64,
}

/// Block-level download state for one torrent.
///
/// A single tracker is shared by every connection of a torrent. Each public
/// method runs as one critical section, so when two connections race for
/// the same block exactly one of them sees it transition to Requested.
///
/// # Examples
///
/// ```
/// use swarmwire::{BlockOutcome, MemorySink, PieceTracker, TorrentMetadata};
/// use bytes::Bytes;
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = b"hello, swarm!!!!".to_vec();
/// let meta = Arc::new(TorrentMetadata::from_data([0u8; 20], 16, &data)?);
/// let sink = Arc::new(MemorySink::new());
/// let tracker = PieceTracker::new(meta, 16384, sink.clone());
///
/// let block = tracker.reserve_block(0).unwrap();
/// let outcome = tracker.mark_received(block.piece, block.offset, Bytes::from(data))?;
///
/// assert_eq!(outcome, BlockOutcome::Verified(0));
/// assert!(tracker.is_done());
/// # Ok(())
/// # }
/// ```
pub struct PieceTracker {
    metadata: Arc<TorrentMetadata>,
    block_size: u32,
    state: Mutex<TrackerState>,
    sink: Arc<dyn PieceSink>,
    next_requester: AtomicU64,
    done_tx: watch::Sender<bool>,
    released_tx: watch::Sender<u64>,
}

impl PieceTracker {
    pub fn new(metadata: Arc<TorrentMetadata>, block_size: u32, sink: Arc<dyn PieceSink>) -> Self {
        let block_size = block_size.max(1);
        let pieces = (0..metadata.piece_count() as u32)
            .map(|i| PieceProgress::new(metadata.piece_len(i), block_size))
            .collect();
        let (done_tx, _) = watch::channel(false);
        let (released_tx, _) = watch::channel(0);

        Self {
            metadata,
            block_size,
            state: Mutex::new(TrackerState {
                pieces,
                durable_pieces: 0,
                durable_bytes: 0,
            }),
            sink,
            next_requester: AtomicU64::new(1),
            done_tx,
            released_tx,
        }
    }

    pub fn metadata(&self) -> &Arc<TorrentMetadata> {
        &self.metadata
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn piece_count(&self) -> usize {
        self.metadata.piece_count()
    }

    /// A fresh id for a connection that reserves blocks.
    pub fn register_requester(&self) -> RequesterId {
        RequesterId(self.next_requester.fetch_add(1, Ordering::Relaxed))
    }

    /// True iff at least one block of the piece is still Needed.
    pub fn needed(&self, piece: u32) -> bool {
        let state = self.state.lock();
        state
            .pieces
            .get(piece as usize)
            .is_some_and(PieceProgress::is_needed)
    }

    pub fn block_state(&self, block: &BlockRequest) -> Option<BlockState> {
        let state = self.state.lock();
        let progress = state.pieces.get(block.piece as usize)?;
        let index = self.block_index(block.piece, block.offset, progress).ok()?;
        Some(progress.blocks[index])
    }

    /// Moves a block from Needed to Requested.
    ///
    /// Returns `Ok(false)` when the block is not Needed any more, i.e. it is
    /// in flight on another connection or already received.
    pub fn mark_requested(&self, block: &BlockRequest) -> Result<bool, PieceError> {
        let mut state = self.state.lock();
        let progress = state
            .pieces
            .get_mut(block.piece as usize)
            .ok_or(PieceError::InvalidPieceIndex(block.piece))?;
        let index = self.block_index(block.piece, block.offset, progress)?;
        self.check_length(block.piece, block.offset, index, progress, block.length as usize)?;

        if progress.durable || progress.blocks[index] != BlockState::Needed {
            return Ok(false);
        }
        progress.blocks[index] = BlockState::Requested;
        progress.holders[index] = RequesterId::ANONYMOUS;
        Ok(true)
    }

    /// Picks the lowest-offset Needed block of `piece` and marks it Requested.
    pub fn reserve_block(&self, piece: u32) -> Option<BlockRequest> {
        self.reserve_block_for(piece, RequesterId::ANONYMOUS)
    }

    /// Like [`reserve_block`](Self::reserve_block), recording `requester`
    /// as the holder.
    pub fn reserve_block_for(&self, piece: u32, requester: RequesterId) -> Option<BlockRequest> {
        let mut state = self.state.lock();
        let progress = state.pieces.get_mut(piece as usize)?;
        if progress.durable {
            return None;
        }

        let index = progress
            .blocks
            .iter()
            .position(|s| *s == BlockState::Needed)?;
        progress.blocks[index] = BlockState::Requested;
        progress.holders[index] = requester;

        Some(BlockRequest::new(
            piece,
            index as u32 * self.block_size,
            compute_block_length(progress.length, index as u32, self.block_size),
        ))
    }

    /// Returns a Requested block to Needed so another connection may fetch
    /// it, whoever holds it.
    pub fn release(&self, block: &BlockRequest) -> bool {
        self.release_block(block, None)
    }

    /// Returns a Requested block to Needed only if `requester` still holds it.
    pub fn release_held(&self, block: &BlockRequest, requester: RequesterId) -> bool {
        self.release_block(block, Some(requester))
    }

    fn release_block(&self, block: &BlockRequest, requester: Option<RequesterId>) -> bool {
        let mut state = self.state.lock();
        let Some(progress) = state.pieces.get_mut(block.piece as usize) else {
            return false;
        };
        let Ok(index) = self.block_index(block.piece, block.offset, progress) else {
            return false;
        };

        let held = match requester {
            Some(requester) => progress.holders[index] == requester,
            None => true,
        };
        if progress.blocks[index] != BlockState::Requested || !held {
            return false;
        }

        progress.blocks[index] = BlockState::Needed;
        progress.holders[index] = RequesterId::ANONYMOUS;
        self.signal_released();
        true
    }

    /// Stores a delivered block.
    ///
    /// Completing a piece triggers verification against its digest; a
    /// verified piece is written to the sink at its torrent offset.
    pub fn mark_received(
        &self,
        piece: u32,
        offset: u32,
        data: Bytes,
    ) -> Result<BlockOutcome, PieceError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let progress = state
            .pieces
            .get_mut(piece as usize)
            .ok_or(PieceError::InvalidPieceIndex(piece))?;
        let index = self.block_index(piece, offset, progress)?;
        self.check_length(piece, offset, index, progress, data.len())?;

        if progress.durable || progress.blocks[index] == BlockState::Received {
            return Ok(BlockOutcome::Duplicate);
        }

        if progress.buffer.is_empty() {
            progress.buffer = vec![0; progress.length as usize];
        }
        let start = offset as usize;
        progress.buffer[start..start + data.len()].copy_from_slice(&data);
        progress.blocks[index] = BlockState::Received;
        progress.holders[index] = RequesterId::ANONYMOUS;
        progress.received += 1;

        if progress.received < progress.blocks.len() {
            return Ok(BlockOutcome::Accepted);
        }

        if !self.metadata.verify_piece(piece, &progress.buffer) {
            warn!(piece, "piece failed hash verification");
            progress.reset();
            self.signal_released();
            return Ok(BlockOutcome::Corrupt(piece));
        }

        let assembled = Bytes::from(std::mem::take(&mut progress.buffer));
        if let Err(e) = self.sink.write(self.metadata.piece_offset(piece), assembled) {
            warn!(piece, error = %e, "failed to store verified piece");
            progress.reset();
            self.signal_released();
            return Err(e.into());
        }

        progress.durable = true;
        let length = progress.length;
        state.durable_pieces += 1;
        state.durable_bytes += length;
        debug!(
            piece,
            durable = state.durable_pieces,
            total = state.pieces.len(),
            "piece verified"
        );

        if state.durable_pieces == state.pieces.len() {
            self.done_tx.send_replace(true);
        }

        Ok(BlockOutcome::Verified(piece))
    }

    /// True iff every piece has been verified and stored.
    pub fn is_done(&self) -> bool {
        let state = self.state.lock();
        state.durable_pieces == state.pieces.len()
    }

    /// Fraction of the torrent's bytes that are durable, in `0.0..=1.0`.
    pub fn percent_done(&self) -> f64 {
        let durable = self.state.lock().durable_bytes;
        durable as f64 / self.metadata.total_length() as f64
    }

    pub fn durable_bytes(&self) -> u64 {
        self.state.lock().durable_bytes
    }

    /// Number of pieces not yet verified and stored.
    pub fn remaining_pieces(&self) -> usize {
        let state = self.state.lock();
        state.pieces.len() - state.durable_pieces
    }

    /// A receiver that flips to `true` once the torrent is complete.
    pub fn subscribe_done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    /// Resolves once every piece is durable.
    pub async fn wait_done(&self) {
        let mut done = self.done_tx.subscribe();
        // The sender lives in `self`, so this only returns on completion.
        let _ = done.wait_for(|done| *done).await;
    }

    /// A receiver that changes whenever Requested or Received blocks go
    /// back to Needed, through a release or a failed digest.
    ///
    /// Connections whose queue already ran dry watch it to pick those
    /// blocks up again.
    pub fn subscribe_released(&self) -> watch::Receiver<u64> {
        self.released_tx.subscribe()
    }

    fn signal_released(&self) {
        self.released_tx.send_modify(|count| *count = count.wrapping_add(1));
    }

    fn block_index(
        &self,
        piece: u32,
        offset: u32,
        progress: &PieceProgress,
    ) -> Result<usize, PieceError> {
        let index = (offset / self.block_size) as usize;
        if offset % self.block_size != 0 || index >= progress.blocks.len() {
            return Err(PieceError::InvalidBlockOffset { piece, offset });
        }
        Ok(index)
    }

    fn check_length(
        &self,
        piece: u32,
        offset: u32,
        index: usize,
        progress: &PieceProgress,
        actual: usize,
    ) -> Result<(), PieceError> {
        let expected = compute_block_length(progress.length, index as u32, self.block_size);
        if actual != expected as usize {
            return Err(PieceError::BlockLengthMismatch {
                piece,
                offset,
                expected,
                actual,
            });
        }
        Ok(())
    }
}
