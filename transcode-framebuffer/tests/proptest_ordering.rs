//! Property-based tests for output ordering.
//!
//! Whatever the worker count, per-frame processing time and drop pattern,
//! the consumer must see the surviving frames in submission order.

mod common;

use common::{video_ring, Jitter};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use transcode_framebuffer::{
    DecimateFilter, FilterChain, FrameStatus, ProcessingChain, RunFlag, WorkerPool,
};

fn run_pipeline(
    workers: usize,
    ring_size: usize,
    delays: Vec<u64>,
    drop_every: u64,
    frames: u64,
) -> Vec<u64> {
    let run = RunFlag::new();
    let ring = video_ring(ring_size, &run);
    let chain = ProcessingChain {
        pre: FilterChain::new().with(DecimateFilter::new(drop_every)),
        ..ProcessingChain::default()
    }
    .with_transform(Jitter::new(delays));
    let pool = WorkerPool::new(Arc::clone(&ring), Arc::new(chain), run);
    pool.start(workers).unwrap();

    let survivors = (0..frames)
        .filter(|id| drop_every == 0 || id % drop_every != 0)
        .count();
    let received = thread::scope(|scope| {
        let consumer = scope.spawn(|| {
            (0..survivors)
                .map(|_| {
                    let slot = ring.retrieve_ready().unwrap();
                    let id = slot.id;
                    assert!(slot.payload().data().iter().all(|&b| b == id as u8));
                    ring.remove_frame(slot);
                    id
                })
                .collect::<Vec<_>>()
        });
        for id in 0..frames {
            let mut slot = ring.register_frame(id, FrameStatus::Empty).unwrap();
            slot.payload_mut().fill(id as u8);
            ring.push_next(slot, FrameStatus::Wait);
            if workers == 0 {
                pool.run_pending();
            }
        }
        consumer.join().unwrap()
    });

    pool.stop();
    assert!(ring.is_idle());
    received
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Frames leave READY in the order they were registered.
    #[test]
    fn ready_order_matches_submission(
        workers in 0usize..=4,
        ring_size in 1usize..=8,
        delays in prop::collection::vec(0u64..300, 1..12),
        drop_every in 0u64..5,
        frames in 1u64..40,
    ) {
        let received = run_pipeline(workers, ring_size, delays, drop_every, frames);
        let expected: Vec<u64> = (0..frames)
            .filter(|id| drop_every == 0 || id % drop_every != 0)
            .collect();
        prop_assert_eq!(received, expected);
    }
}

#[test]
fn single_slot_ring_with_many_workers() {
    let received = run_pipeline(4, 1, vec![100, 0], 0, 16);
    assert_eq!(received, (0..16).collect::<Vec<_>>());
}
