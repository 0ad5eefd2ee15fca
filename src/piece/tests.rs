use super::*;
use crate::metainfo::TorrentMetadata;
use crate::storage::MemorySink;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;

fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn create_tracker(data: &[u8], piece_length: u64, block_size: u32) -> (PieceTracker, Arc<MemorySink>) {
    let meta = Arc::new(TorrentMetadata::from_data([1u8; 20], piece_length, data).unwrap());
    let sink = Arc::new(MemorySink::new());
    (PieceTracker::new(meta, block_size, sink.clone()), sink)
}

fn deliver(tracker: &PieceTracker, data: &[u8], block: BlockRequest) -> BlockOutcome {
    let piece_offset = tracker.metadata().piece_offset(block.piece) as usize;
    let start = piece_offset + block.offset as usize;
    let bytes = Bytes::copy_from_slice(&data[start..start + block.length as usize]);
    tracker
        .mark_received(block.piece, block.offset, bytes)
        .unwrap()
}

#[test]
fn test_block_geometry() {
    assert_eq!(compute_block_count(16, 4), 4);
    assert_eq!(compute_block_count(10, 4), 3);
    assert_eq!(compute_block_length(10, 2, 4), 2);
    assert_eq!(compute_block_length(16384 * 2, 1, 16384), 16384);
}

#[test]
fn test_reserve_lowest_offset_first() {
    let data = test_data(24);
    let (tracker, _) = create_tracker(&data, 16, 4);

    let first = tracker.reserve_block(0).unwrap();
    let second = tracker.reserve_block(0).unwrap();
    assert_eq!(first, BlockRequest::new(0, 0, 4));
    assert_eq!(second, BlockRequest::new(0, 4, 4));

    let last = tracker.reserve_block(1).unwrap();
    assert_eq!(last, BlockRequest::new(1, 0, 4));
}

#[test]
fn test_needed_until_all_requested() {
    let data = test_data(8);
    let (tracker, _) = create_tracker(&data, 8, 4);

    assert!(tracker.needed(0));
    tracker.reserve_block(0).unwrap();
    assert!(tracker.needed(0));
    tracker.reserve_block(0).unwrap();
    assert!(!tracker.needed(0));
    assert!(tracker.reserve_block(0).is_none());
    assert!(!tracker.needed(7));
}

#[test]
fn test_mark_requested_only_once() {
    let data = test_data(8);
    let (tracker, _) = create_tracker(&data, 8, 4);
    let block = BlockRequest::new(0, 4, 4);

    assert!(tracker.mark_requested(&block).unwrap());
    assert!(!tracker.mark_requested(&block).unwrap());
    assert_eq!(tracker.block_state(&block), Some(BlockState::Requested));

    deliver(&tracker, &data, block);
    assert!(!tracker.mark_requested(&block).unwrap());
}

#[test]
fn test_mark_requested_validates_geometry() {
    let data = test_data(8);
    let (tracker, _) = create_tracker(&data, 8, 4);

    assert!(matches!(
        tracker.mark_requested(&BlockRequest::new(3, 0, 4)),
        Err(PieceError::InvalidPieceIndex(3))
    ));
    assert!(matches!(
        tracker.mark_requested(&BlockRequest::new(0, 2, 4)),
        Err(PieceError::InvalidBlockOffset { piece: 0, offset: 2 })
    ));
    assert!(matches!(
        tracker.mark_requested(&BlockRequest::new(0, 0, 3)),
        Err(PieceError::BlockLengthMismatch { .. })
    ));
}

#[test]
fn test_concurrent_reservations_never_overlap() {
    let data = test_data(4096);
    let (tracker, _) = create_tracker(&data, 4096, 16);
    let tracker = Arc::new(tracker);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                let mut won = Vec::new();
                while let Some(block) = tracker.reserve_block(0) {
                    won.push(block.offset);
                }
                won
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for offset in handle.join().unwrap() {
            assert!(seen.insert(offset), "block {} reserved twice", offset);
        }
    }
    assert_eq!(seen.len(), 4096 / 16);
}

#[test]
fn test_two_piece_torrent_completes() {
    let data = test_data(24);
    let (tracker, sink) = create_tracker(&data, 16, 16384);

    let first = tracker.reserve_block(0).unwrap();
    assert_eq!(first.length, 16);
    assert_eq!(deliver(&tracker, &data, first), BlockOutcome::Verified(0));
    assert!(!tracker.is_done());
    assert!((tracker.percent_done() - 16.0 / 24.0).abs() < f64::EPSILON);

    let second = tracker.reserve_block(1).unwrap();
    assert_eq!(second.length, 8);
    assert_eq!(deliver(&tracker, &data, second), BlockOutcome::Verified(1));
    assert!(tracker.is_done());
    assert_eq!(tracker.percent_done(), 1.0);

    let writes = sink.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].0, 0);
    assert_eq!(writes[0].1.len(), 16);
    assert_eq!(writes[1].0, 16);
    assert_eq!(writes[1].1.len(), 8);
    assert_eq!(sink.assemble(24), data);
}

#[test]
fn test_duplicate_block_is_noop() {
    let data = test_data(8);
    let (tracker, sink) = create_tracker(&data, 8, 4);

    let block = tracker.reserve_block(0).unwrap();
    assert_eq!(deliver(&tracker, &data, block), BlockOutcome::Accepted);
    assert_eq!(deliver(&tracker, &data, block), BlockOutcome::Duplicate);

    let rest = tracker.reserve_block(0).unwrap();
    assert_eq!(deliver(&tracker, &data, rest), BlockOutcome::Verified(0));
    assert_eq!(deliver(&tracker, &data, rest), BlockOutcome::Duplicate);

    assert_eq!(tracker.durable_bytes(), 8);
    assert_eq!(sink.writes().len(), 1);
}

#[test]
fn test_unrequested_block_is_accepted() {
    let data = test_data(8);
    let (tracker, _) = create_tracker(&data, 8, 8);

    let outcome = tracker
        .mark_received(0, 0, Bytes::copy_from_slice(&data))
        .unwrap();
    assert_eq!(outcome, BlockOutcome::Verified(0));
}

#[test]
fn test_length_mismatch_leaves_block_requested() {
    let data = test_data(8);
    let (tracker, _) = create_tracker(&data, 8, 4);

    let block = tracker.reserve_block(0).unwrap();
    let result = tracker.mark_received(0, 0, Bytes::from_static(b"abc"));
    assert!(matches!(
        result,
        Err(PieceError::BlockLengthMismatch {
            expected: 4,
            actual: 3,
            ..
        })
    ));
    assert_eq!(tracker.block_state(&block), Some(BlockState::Requested));
}

#[test]
fn test_corrupt_piece_resets_all_blocks() {
    let data = test_data(8);
    let (tracker, sink) = create_tracker(&data, 8, 4);

    let a = tracker.reserve_block(0).unwrap();
    let b = tracker.reserve_block(0).unwrap();
    assert_eq!(deliver(&tracker, &data, a), BlockOutcome::Accepted);

    let outcome = tracker
        .mark_received(0, 4, Bytes::from_static(b"XXXX"))
        .unwrap();
    assert_eq!(outcome, BlockOutcome::Corrupt(0));

    assert_eq!(tracker.block_state(&a), Some(BlockState::Needed));
    assert_eq!(tracker.block_state(&b), Some(BlockState::Needed));
    assert!(tracker.needed(0));
    assert!(!tracker.is_done());
    assert!(sink.writes().is_empty());

    // Re-requestable, and a clean delivery now verifies.
    let a = tracker.reserve_block(0).unwrap();
    let b = tracker.reserve_block(0).unwrap();
    assert_eq!(deliver(&tracker, &data, a), BlockOutcome::Accepted);
    assert_eq!(deliver(&tracker, &data, b), BlockOutcome::Verified(0));
    assert!(tracker.is_done());
}

#[test]
fn test_release_returns_block_to_needed() {
    let data = test_data(4);
    let (tracker, _) = create_tracker(&data, 4, 4);

    let block = tracker.reserve_block(0).unwrap();
    assert!(!tracker.needed(0));

    assert!(tracker.release(&block));
    assert!(tracker.needed(0));
    assert!(!tracker.release(&block));

    deliver(&tracker, &data, block);
    assert!(!tracker.release(&block));
}

#[test]
fn test_done_signal() {
    let data = test_data(4);
    let (tracker, _) = create_tracker(&data, 4, 4);
    let done = tracker.subscribe_done();

    assert!(!*done.borrow());
    let block = tracker.reserve_block(0).unwrap();
    deliver(&tracker, &data, block);
    assert!(*done.borrow());
    assert_eq!(tracker.remaining_pieces(), 0);
}

#[test]
fn test_release_held_ignores_stale_holder() {
    let data = test_data(8);
    let (tracker, _) = create_tracker(&data, 8, 4);
    let first = tracker.register_requester();
    let second = tracker.register_requester();
    assert_ne!(first, second);

    let block = tracker.reserve_block_for(0, first).unwrap();
    let rest = tracker.reserve_block_for(0, first).unwrap();
    assert!(!tracker.release_held(&block, second));
    assert_eq!(tracker.block_state(&block), Some(BlockState::Requested));

    // A corrupt piece sends every block back to Needed, and the second
    // requester picks the first block up again.
    tracker.mark_received(0, 0, Bytes::from_static(b"XXXX")).unwrap();
    let outcome = tracker.mark_received(0, 4, Bytes::from_static(b"YYYY")).unwrap();
    assert_eq!(outcome, BlockOutcome::Corrupt(0));
    assert_eq!(tracker.reserve_block_for(0, second), Some(block));

    assert!(!tracker.release_held(&block, first));
    assert!(!tracker.release_held(&rest, first));
    assert_eq!(tracker.block_state(&block), Some(BlockState::Requested));

    assert!(tracker.release_held(&block, second));
    assert_eq!(tracker.block_state(&block), Some(BlockState::Needed));
}

#[test]
fn test_released_signal() {
    let data = test_data(8);
    let (tracker, _) = create_tracker(&data, 8, 4);
    let mut released = tracker.subscribe_released();
    assert!(!released.has_changed().unwrap());

    let block = tracker.reserve_block(0).unwrap();
    assert!(!released.has_changed().unwrap());
    assert!(tracker.release(&block));
    assert!(released.has_changed().unwrap());
    released.borrow_and_update();

    // A failed release changes nothing.
    assert!(!tracker.release(&block));
    assert!(!released.has_changed().unwrap());

    let a = tracker.reserve_block(0).unwrap();
    let b = tracker.reserve_block(0).unwrap();
    assert_eq!(deliver(&tracker, &data, a), BlockOutcome::Accepted);
    assert!(!released.has_changed().unwrap());
    let outcome = tracker.mark_received(b.piece, b.offset, Bytes::from_static(b"XXXX")).unwrap();
    assert_eq!(outcome, BlockOutcome::Corrupt(0));
    assert!(released.has_changed().unwrap());
}
