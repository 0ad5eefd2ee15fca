use super::bitfield::Bitfield;
use crate::constants::MAX_IN_FLIGHT_REQUESTS;
use crate::piece::{BlockRequest, PieceTracker, RequesterId};
use std::collections::VecDeque;

/// Request scheduling state for one connection.
///
/// Pieces are offered in the order the peer announced them, one block at
/// a time. The queue only ever hands out blocks the shared tracker agreed
/// to mark Requested, so two connections never fetch the same block.
#[derive(Debug)]
pub struct PeerRequestQueue {
    pending: VecDeque<u32>,
    advertised: Bitfield,
    choked: bool,
    in_flight: Vec<BlockRequest>,
    max_in_flight: usize,
    requester: RequesterId,
}

impl PeerRequestQueue {
    /// A queue for a torrent of `piece_count` pieces. Peers start out choking us.
    pub fn new(piece_count: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            advertised: Bitfield::new(piece_count),
            choked: true,
            in_flight: Vec::new(),
            max_in_flight: MAX_IN_FLIGHT_REQUESTS,
            requester: RequesterId::ANONYMOUS,
        }
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Reserves blocks under `requester` instead of anonymously.
    pub fn with_requester(mut self, requester: RequesterId) -> Self {
        self.requester = requester;
        self
    }

    /// Records a `have`. Returns true if a pull should follow.
    pub fn on_have(&mut self, piece: u32) -> bool {
        let was_empty = self.pending.is_empty();
        self.push(piece);
        was_empty && !self.choked
    }

    /// Records a `bitfield`. Returns true if a pull should follow.
    pub fn on_bitfield(&mut self, bits: &Bitfield) -> bool {
        let was_empty = self.pending.is_empty();
        for piece in bits.available_pieces() {
            self.push(piece as u32);
        }
        was_empty && !self.choked
    }

    /// The peer stopped serving requests. Blocks already in flight stay
    /// accounted for: the peer decides whether it still delivers them.
    pub fn on_choke(&mut self) {
        self.choked = true;
    }

    /// The peer serves requests again. A pull should follow.
    ///
    /// Peers drop pending requests when they choke, so whatever is still
    /// in flight has to be asked for again; see
    /// [`in_flight_blocks`](Self::in_flight_blocks).
    pub fn on_unchoke(&mut self) -> bool {
        self.choked = false;
        true
    }

    /// Selects the next block to request, marking it Requested in `tracker`.
    ///
    /// Pieces at the front of the queue that the tracker no longer needs are
    /// dropped. Returns `None` when choked, when the pipeline is full, or
    /// when the queue runs dry.
    pub fn pull(&mut self, tracker: &PieceTracker) -> Option<BlockRequest> {
        if self.choked || self.in_flight.len() >= self.max_in_flight {
            return None;
        }

        while let Some(&piece) = self.pending.front() {
            // `needed` is advisory; `reserve_block` is the atomic claim and
            // may still lose a race with another connection.
            if tracker.needed(piece) {
                if let Some(block) = tracker.reserve_block_for(piece, self.requester) {
                    self.in_flight.push(block);
                    return Some(block);
                }
            }
            self.pending.pop_front();
        }

        None
    }

    /// Clears the in-flight slot for a delivered block.
    ///
    /// Returns false if the block was not requested on this connection.
    pub fn complete(&mut self, piece: u32, offset: u32) -> bool {
        match self
            .in_flight
            .iter()
            .position(|b| b.piece == piece && b.offset == offset)
        {
            Some(pos) => {
                self.in_flight.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Puts an advertised piece back at the end of the queue, e.g. after it
    /// failed verification.
    pub fn requeue(&mut self, piece: u32) -> bool {
        if !self.advertised.has_piece(piece as usize) || self.pending.contains(&piece) {
            return false;
        }
        self.pending.push_back(piece);
        true
    }

    /// Re-queues every advertised piece the tracker needs again.
    ///
    /// Blocks released by closed connections or reset after a failed digest
    /// are otherwise invisible to a queue that already dropped their piece.
    /// Returns the number of pieces re-queued.
    pub fn resync(&mut self, tracker: &PieceTracker) -> usize {
        let needed: Vec<u32> = self
            .advertised
            .available_pieces()
            .map(|p| p as u32)
            .filter(|&p| !self.pending.contains(&p) && tracker.needed(p))
            .collect();
        let count = needed.len();
        self.pending.extend(needed);
        count
    }

    /// Hands back the blocks still in flight, emptying the pipeline.
    pub fn drain_in_flight(&mut self) -> Vec<BlockRequest> {
        std::mem::take(&mut self.in_flight)
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Blocks requested on this connection and not yet delivered.
    pub fn in_flight_blocks(&self) -> &[BlockRequest] {
        &self.in_flight
    }

    pub fn requester(&self) -> RequesterId {
        self.requester
    }

    pub fn advertised(&self) -> &Bitfield {
        &self.advertised
    }

    fn push(&mut self, piece: u32) {
        // Out-of-range indices are dropped by the bitfield.
        if !self.advertised.set_piece(piece as usize) {
            return;
        }
        if !self.pending.contains(&piece) {
            self.pending.push_back(piece);
        }
    }
}
