//! The frame ring: a fixed set of slots and the stage pools they move through.

use crate::context::RunFlag;
use crate::error::{FrameBufferError, Result, StreamKind};
use crate::slot::{FrameAttributes, FramePayload, FrameSlot, FrameStatus, Stage};
use crate::stage::StagePool;
use crate::telemetry;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

/// Largest number of slots a ring may hold.
pub const MAX_RING_SIZE: usize = 1024;

/// Snapshot of how many slots each stage holds.
///
/// Slots taken out of a pool by a producer, worker or consumer still count
/// for the stage they were taken from, so the four fields always add up to
/// the ring size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounters {
    pub null: usize,
    pub empty: usize,
    pub wait: usize,
    pub ready: usize,
}

impl StageCounters {
    /// Slots across all stages.
    pub fn total(&self) -> usize {
        self.null + self.empty + self.wait + self.ready
    }

    /// Frames being filled, processed and waiting for output.
    pub fn in_flight(&self) -> (usize, usize, usize) {
        (self.empty, self.wait, self.ready)
    }

    /// Counts labeled with their stage name.
    pub fn by_stage(&self) -> [(&'static str, usize); 4] {
        [
            ("null", self.null),
            ("empty", self.empty),
            ("wait", self.wait),
            ("ready", self.ready),
        ]
    }
}

/// Fixed-size pool of frame slots for one stream.
pub struct FrameRing<P: FramePayload> {
    spec: P::Spec,
    size: usize,
    pools: [StagePool<P>; 4],
    census: Mutex<[usize; 4]>,
}

impl<P: FramePayload> FrameRing<P> {
    /// Allocate `size` slots from `spec`, all of them free.
    ///
    /// A size of zero is raised to one. Fails with a configuration error
    /// for a size above [`MAX_RING_SIZE`] or an invalid spec, and with
    /// [`FrameBufferError::ResourceExhausted`] when a slot cannot be
    /// allocated; the slots allocated so far are released.
    pub fn new(spec: P::Spec, size: usize, run: RunFlag) -> Result<Self> {
        let stream = P::KIND;
        if size > MAX_RING_SIZE {
            return Err(FrameBufferError::InvalidConfig(format!(
                "{stream} ring size {size} exceeds {MAX_RING_SIZE}"
            )));
        }
        if size == 0 {
            debug!(%stream, "ring size 0 raised to 1");
        }
        let size = size.max(1);
        P::validate(&spec)?;

        let pools = Stage::ALL.map(|stage| StagePool::new(stage.status(), run.clone()));
        for bufid in 0..size {
            let payload = P::alloc(&spec).map_err(|e| FrameBufferError::ResourceExhausted {
                stream,
                allocated: bufid,
                requested: size,
                reason: e.to_string(),
            })?;
            pools[Stage::Null.index()].put(FrameSlot::new(bufid, payload));
        }

        info!(%stream, size, "frame ring created");
        Ok(Self {
            spec,
            size,
            pools,
            census: Mutex::new([size, 0, 0, 0]),
        })
    }

    /// Stream this ring serves.
    pub fn kind(&self) -> StreamKind {
        P::KIND
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Spec the slots were allocated from.
    pub fn spec(&self) -> &P::Spec {
        &self.spec
    }

    /// Pool backing a status.
    pub fn pool(&self, status: FrameStatus) -> &StagePool<P> {
        self.stage(status.stage())
    }

    fn stage(&self, stage: Stage) -> &StagePool<P> {
        &self.pools[stage.index()]
    }

    fn move_census(&self, from: Stage, to: Stage) {
        if from == to {
            return;
        }
        let mut census = self.census.lock();
        debug_assert!(census[from.index()] > 0, "{from:?} census underflow");
        census[from.index()] = census[from.index()].saturating_sub(1);
        census[to.index()] += 1;
    }

    fn admit(&self, mut slot: FrameSlot<P>, id: u64, status: FrameStatus) -> FrameSlot<P> {
        slot.reset(id, &self.spec);
        slot.set_position(self.stage(Stage::Ready).announce());
        slot.set_status(status);
        self.move_census(Stage::Null, status.stage());
        trace!(stream = %P::KIND, bufid = slot.bufid(), id, %status, "frame registered");
        slot
    }

    /// Take a free slot for frame `id` and give it `status`.
    ///
    /// Blocks while every slot is in flight. Returns `None` when the
    /// pipeline is interrupted before a slot frees up.
    pub fn register_frame(&self, id: u64, status: FrameStatus) -> Option<FrameSlot<P>> {
        if status == FrameStatus::Null {
            debug_assert!(false, "frames are registered into a live stage");
            warn!(stream = %P::KIND, id, "refusing to register a frame as null");
            return None;
        }
        let slot = self.stage(Stage::Null).get()?;
        Some(self.admit(slot, id, status))
    }

    /// Like [`register_frame`](Self::register_frame), without blocking.
    pub fn try_register_frame(&self, id: u64, status: FrameStatus) -> Option<FrameSlot<P>> {
        if status == FrameStatus::Null {
            return None;
        }
        let slot = self.stage(Stage::Null).try_get()?;
        Some(self.admit(slot, id, status))
    }

    /// Return a slot to the free pool, whatever stage it is in.
    pub fn remove_frame(&self, mut slot: FrameSlot<P>) {
        let from = slot.status().stage();
        // Frames dropped before output must not hold back their successors.
        self.stage(Stage::Ready).retire(slot.position());
        trace!(stream = %P::KIND, bufid = slot.bufid(), id = slot.id, "frame removed");
        slot.set_status(FrameStatus::Null);
        self.move_census(from, Stage::Null);
        self.stage(Stage::Null).put(slot);
        self.output_changed(from, Stage::Null);
    }

    /// Put a slot back into the pool of its current status.
    pub fn reinject_frame(&self, slot: FrameSlot<P>) -> bool {
        self.pool(slot.status()).put(slot)
    }

    /// Move a slot to the pool for `status`.
    ///
    /// Returns whether the slot is immediately consumable there.
    pub fn push_next(&self, mut slot: FrameSlot<P>, status: FrameStatus) -> bool {
        if status == FrameStatus::Null {
            self.remove_frame(slot);
            return true;
        }
        let from = slot.status().stage();
        slot.set_status(status);
        self.move_census(from, status.stage());
        let consumable = self.pool(status).put(slot);
        self.output_changed(from, status.stage());
        consumable
    }

    /// Let clone waiters re-check whether output can still drain.
    fn output_changed(&self, from: Stage, to: Stage) {
        if from != to && (from == Stage::Ready || to == Stage::Ready) {
            self.stage(Stage::Null).wake();
        }
    }

    /// Check if the consumer holds the output head or can take it now.
    ///
    /// While this holds, the consumer will return a slot to the free pool.
    fn output_pending(&self) -> bool {
        let ready = self.stage(Stage::Ready);
        ready.consumable() || self.counters().ready > ready.len()
    }

    /// Block for a slot of the given status.
    pub fn retrieve(&self, status: FrameStatus) -> Option<FrameSlot<P>> {
        self.pool(status).get()
    }

    /// Block for a frame waiting to be processed, marking it locked.
    pub fn reserve(&self) -> Option<FrameSlot<P>> {
        self.reserve_while(|| true)
    }

    /// Like [`reserve`](Self::reserve), giving up once `keep` turns false
    /// and the WAIT stage is empty.
    pub fn reserve_while(&self, keep: impl Fn() -> bool) -> Option<FrameSlot<P>> {
        let mut slot = self.stage(Stage::Wait).get_while(keep)?;
        slot.set_status(FrameStatus::Locked);
        Some(slot)
    }

    /// Take a waiting frame without blocking, marking it locked.
    pub fn try_reserve(&self) -> Option<FrameSlot<P>> {
        let mut slot = self.stage(Stage::Wait).try_get()?;
        slot.set_status(FrameStatus::Locked);
        Some(slot)
    }

    /// Block for the next processed frame in submission order.
    pub fn retrieve_ready(&self) -> Option<FrameSlot<P>> {
        self.stage(Stage::Ready).get()
    }

    /// Duplicate a frame into the WAIT stage, right behind it in output order.
    ///
    /// See [`clone_frame_while`](Self::clone_frame_while).
    pub fn clone_frame(&self, src: &mut FrameSlot<P>, copy_data: bool) -> bool {
        self.clone_frame_while(src, copy_data, || true)
    }

    /// Duplicate a frame, blocking for a free slot while `keep` holds.
    ///
    /// Clears the clone request on both frames and marks the duplicate
    /// `WAS_CLONED`. The end-of-stream marker moves to the duplicate, which
    /// is now the last frame.
    ///
    /// The wait only lasts while the consumer holds the output head or can
    /// take it: otherwise no slot is bound to come back and the clone is
    /// refused. Returns false if no slot was obtained or the payload could
    /// not be copied.
    pub fn clone_frame_while(
        &self,
        src: &mut FrameSlot<P>,
        copy_data: bool,
        keep: impl Fn() -> bool,
    ) -> bool {
        src.attributes.remove(FrameAttributes::CLONED);
        let free = self.stage(Stage::Null);
        match free.get_while(|| keep() && self.output_pending()) {
            Some(clone) => self.attach_clone(src, clone, copy_data),
            None => {
                debug!(stream = %P::KIND, id = src.id, "no free slot for clone");
                false
            }
        }
    }

    /// Like [`clone_frame`](Self::clone_frame), refusing instead of
    /// blocking when no slot is free.
    pub fn try_clone_frame(&self, src: &mut FrameSlot<P>, copy_data: bool) -> bool {
        src.attributes.remove(FrameAttributes::CLONED);
        match self.stage(Stage::Null).try_get() {
            Some(clone) => self.attach_clone(src, clone, copy_data),
            None => false,
        }
    }

    fn attach_clone(&self, src: &mut FrameSlot<P>, mut clone: FrameSlot<P>, copy_data: bool) -> bool {
        clone.reset(src.id, &self.spec);
        if let Err(err) = clone.copy(src, copy_data) {
            warn!(stream = %P::KIND, id = src.id, error = %err, "frame clone failed");
            self.stage(Stage::Null).put(clone);
            return false;
        }
        if src.is_end_of_stream() {
            src.attributes.remove(FrameAttributes::END_OF_STREAM);
        }
        clone.attributes.insert(FrameAttributes::WAS_CLONED);
        clone.set_position(self.stage(Stage::Ready).announce_clone(src.position()));
        clone.set_status(FrameStatus::Wait);
        self.move_census(Stage::Null, Stage::Wait);
        trace!(stream = %P::KIND, id = src.id, bufid = clone.bufid(), "frame cloned");
        self.stage(Stage::Wait).put(clone);
        true
    }

    /// Force every queued slot back to the free pool.
    ///
    /// Not synchronized with slot holders: call between passes or once all
    /// threads have let go of their slots. Returns the number of slots moved.
    pub fn flush(&self) -> usize {
        let mut moved = 0;
        for stage in [Stage::Empty, Stage::Wait, Stage::Ready] {
            for mut slot in self.stage(stage).drain() {
                slot.set_status(FrameStatus::Null);
                self.move_census(stage, Stage::Null);
                self.stage(Stage::Null).put(slot);
                moved += 1;
            }
        }
        if moved > 0 {
            debug!(stream = %P::KIND, moved, "ring flushed");
        }
        moved
    }

    /// Per-stage slot counts.
    pub fn counters(&self) -> StageCounters {
        let census = *self.census.lock();
        StageCounters {
            null: census[Stage::Null.index()],
            empty: census[Stage::Empty.index()],
            wait: census[Stage::Wait.index()],
            ready: census[Stage::Ready.index()],
        }
    }

    /// Frames being filled, processed and waiting for output.
    pub fn get_counters(&self) -> (usize, usize, usize) {
        self.counters().in_flight()
    }

    /// Check if every slot is free.
    pub fn is_idle(&self) -> bool {
        self.counters().null == self.size
    }

    /// Wake every consumer blocked on one stage.
    pub fn wake_stage(&self, status: FrameStatus) {
        self.pool(status).wake();
    }

    /// Wake every consumer blocked anywhere in the ring.
    pub fn wake_all(&self) {
        for pool in &self.pools {
            pool.wake();
        }
    }

    /// Log the stage census and queue depths.
    pub fn dump_status(&self) {
        let counters = self.counters();
        debug!(
            stream = %P::KIND,
            size = self.size,
            null = counters.null,
            empty = counters.empty,
            wait = counters.wait,
            ready = counters.ready,
            wait_queued = self.stage(Stage::Wait).len(),
            ready_parked = self.stage(Stage::Ready).len(),
            "frame ring status"
        );
        telemetry::record_census(P::KIND, &counters);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use transcode_core::{AudioSpec, FrameBuffer, PixelFormat, SampleBuffer, SampleFormat, VideoSpec};

    fn video_ring(size: usize) -> FrameRing<FrameBuffer> {
        FrameRing::new(VideoSpec::new(8, 8, PixelFormat::Gray8), size, RunFlag::new()).unwrap()
    }

    #[test]
    fn test_init_places_every_slot_in_null() {
        let ring = video_ring(4);
        assert_eq!(ring.size(), 4);
        assert_eq!(ring.counters(), StageCounters { null: 4, ..Default::default() });
        assert_eq!(ring.pool(FrameStatus::Null).len(), 4);
        assert!(ring.is_idle());
    }

    #[test]
    fn test_size_zero_is_raised() {
        assert_eq!(video_ring(0).size(), 1);
    }

    #[test]
    fn test_bad_arguments_are_config_errors() {
        let err = FrameRing::<FrameBuffer>::new(
            VideoSpec::new(8, 8, PixelFormat::Gray8),
            MAX_RING_SIZE + 1,
            RunFlag::new(),
        )
        .err()
        .unwrap();
        assert!(err.is_config());

        let err = FrameRing::<SampleBuffer>::new(
            AudioSpec::new(0, 2, SampleFormat::S16, 48_000),
            4,
            RunFlag::new(),
        )
        .err()
        .unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_allocation_failure_is_resource_error() {
        let spec = VideoSpec::new(8, 8, PixelFormat::Gray8).with_max(1 << 30, 1 << 30);
        let err = FrameRing::<FrameBuffer>::new(spec, 2, RunFlag::new()).err().unwrap();
        assert!(err.is_resource());
        assert!(!err.is_config());
    }

    #[test]
    fn test_slot_lifecycle() {
        let ring = video_ring(2);
        let slot = ring.register_frame(0, FrameStatus::Empty).unwrap();
        assert_eq!(slot.status(), FrameStatus::Empty);
        assert_eq!(ring.get_counters(), (1, 0, 0));

        assert!(ring.push_next(slot, FrameStatus::Wait));
        assert_eq!(ring.get_counters(), (0, 1, 0));

        let slot = ring.reserve().unwrap();
        assert_eq!(slot.status(), FrameStatus::Locked);
        assert_eq!(ring.get_counters(), (0, 1, 0));

        assert!(ring.push_next(slot, FrameStatus::Ready));
        let slot = ring.retrieve_ready().unwrap();
        assert_eq!(slot.id, 0);
        assert_eq!(ring.get_counters(), (0, 0, 1));

        ring.remove_frame(slot);
        assert!(ring.is_idle());
    }

    #[test]
    fn test_register_resets_metadata() {
        let ring = video_ring(1);
        let mut slot = ring.register_frame(3, FrameStatus::Empty).unwrap();
        slot.attributes = FrameAttributes::SKIPPED | FrameAttributes::KEYFRAME;
        slot.filter_id = 11;
        ring.remove_frame(slot);

        let slot = ring.register_frame(4, FrameStatus::Empty).unwrap();
        assert_eq!(slot.id, 4);
        assert!(slot.attributes.is_empty());
        assert_eq!(slot.filter_id, 0);
        assert_eq!(slot.bufid(), 0);
    }

    #[test]
    fn test_try_register_does_not_block() {
        let ring = video_ring(1);
        let held = ring.try_register_frame(0, FrameStatus::Empty).unwrap();
        assert!(ring.try_register_frame(1, FrameStatus::Empty).is_none());
        ring.remove_frame(held);
        assert!(ring.try_register_frame(1, FrameStatus::Empty).is_some());
    }

    #[test]
    fn test_reinject_keeps_stage() {
        let ring = video_ring(2);
        let slot = ring.register_frame(0, FrameStatus::Wait).unwrap();
        ring.push_next(slot, FrameStatus::Wait);
        let slot = ring.reserve().unwrap();
        ring.reinject_frame(slot);
        assert_eq!(ring.pool(FrameStatus::Wait).len(), 1);
        assert_eq!(ring.get_counters(), (0, 1, 0));
    }

    #[test]
    fn test_skipped_frame_does_not_stall_output() {
        let ring = video_ring(3);
        let first = ring.register_frame(0, FrameStatus::Empty).unwrap();
        let second = ring.register_frame(1, FrameStatus::Empty).unwrap();

        ring.push_next(second, FrameStatus::Ready);
        assert!(ring.pool(FrameStatus::Ready).try_get().is_none());

        ring.remove_frame(first);
        assert_eq!(ring.retrieve_ready().unwrap().id, 1);
    }

    #[test]
    fn test_clone_follows_original() {
        let ring = video_ring(4);
        let mut original = ring.register_frame(0, FrameStatus::Empty).unwrap();
        let next = ring.register_frame(1, FrameStatus::Empty).unwrap();
        original.payload_mut().fill(0x5A);
        original.attributes.insert(FrameAttributes::CLONED);

        assert!(ring.clone_frame(&mut original, true));
        assert!(!original.attributes.contains(FrameAttributes::CLONED));
        assert_eq!(ring.get_counters(), (2, 1, 0));

        let clone = ring.reserve().unwrap();
        assert_eq!(clone.id, 0);
        assert!(clone.attributes.contains(FrameAttributes::WAS_CLONED));
        assert!(!clone.attributes.contains(FrameAttributes::CLONED));
        assert!(clone.payload().data().iter().all(|&b| b == 0x5A));

        ring.push_next(next, FrameStatus::Ready);
        ring.push_next(clone, FrameStatus::Ready);
        ring.push_next(original, FrameStatus::Ready);

        let order: Vec<_> = (0..3)
            .map(|_| {
                let slot = ring.retrieve_ready().unwrap();
                let seen = (slot.id, slot.attributes.contains(FrameAttributes::WAS_CLONED));
                ring.remove_frame(slot);
                seen
            })
            .collect();
        assert_eq!(order, vec![(0, false), (0, true), (1, false)]);
        assert!(ring.is_idle());
    }

    #[test]
    fn test_clone_carries_end_of_stream() {
        let ring = video_ring(2);
        let mut last = ring.register_frame(9, FrameStatus::Empty).unwrap();
        last.attributes.insert(FrameAttributes::END_OF_STREAM | FrameAttributes::CLONED);
        assert!(ring.clone_frame(&mut last, false));
        assert!(!last.is_end_of_stream());
        assert!(ring.reserve().unwrap().is_end_of_stream());
    }

    #[test]
    fn test_clone_refused_when_nothing_can_drain() {
        let ring = video_ring(1);
        let mut only = ring.register_frame(0, FrameStatus::Empty).unwrap();
        only.attributes.insert(FrameAttributes::CLONED | FrameAttributes::END_OF_STREAM);

        // Nothing is in READY, so no slot can come back: refuse, do not block.
        assert!(!ring.clone_frame(&mut only, true));
        assert!(!ring.try_clone_frame(&mut only, true));
        assert!(!only.attributes.contains(FrameAttributes::CLONED));
        assert!(only.is_end_of_stream());
        assert_eq!(ring.get_counters(), (1, 0, 0));
    }

    #[test]
    fn test_clone_waits_for_consumer_to_return_a_slot() {
        let ring = Arc::new(video_ring(2));
        let first = ring.register_frame(0, FrameStatus::Empty).unwrap();
        ring.push_next(first, FrameStatus::Ready);
        let mut second = ring.register_frame(1, FrameStatus::Empty).unwrap();
        assert!(!ring.try_clone_frame(&mut second, false));

        let consumer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                while ring.pool(FrameStatus::Null).waiting() == 0 {
                    std::thread::yield_now();
                }
                let slot = ring.retrieve_ready().unwrap();
                ring.remove_frame(slot);
            })
        };
        assert!(ring.clone_frame(&mut second, false));
        consumer.join().unwrap();
        assert_eq!(ring.reserve().unwrap().id, 1);
    }

    #[test]
    fn test_flush_returns_queued_slots() {
        let ring = video_ring(4);
        for id in 0..3 {
            let slot = ring.register_frame(id, FrameStatus::Empty).unwrap();
            let next = [FrameStatus::Empty, FrameStatus::Wait, FrameStatus::Ready][id as usize];
            ring.push_next(slot, next);
        }
        assert_eq!(ring.counters().total(), 4);
        assert_eq!(ring.flush(), 3);
        assert!(ring.is_idle());
        assert_eq!(ring.flush(), 0);

        // Ordering starts over cleanly after a flush.
        let slot = ring.register_frame(10, FrameStatus::Empty).unwrap();
        ring.push_next(slot, FrameStatus::Ready);
        assert_eq!(ring.retrieve_ready().unwrap().id, 10);
    }

    #[test]
    fn test_push_to_null_removes() {
        let ring = video_ring(1);
        let slot = ring.register_frame(0, FrameStatus::Empty).unwrap();
        ring.push_next(slot, FrameStatus::Null);
        assert!(ring.is_idle());
    }

    #[test]
    fn test_interrupted_register_returns_none() {
        let run = RunFlag::new();
        let ring: FrameRing<FrameBuffer> =
            FrameRing::new(VideoSpec::new(8, 8, PixelFormat::Gray8), 1, run.clone()).unwrap();
        let _held = ring.register_frame(0, FrameStatus::Empty).unwrap();
        run.stop();
        assert!(ring.register_frame(1, FrameStatus::Empty).is_none());
    }
}
