//! Filter workers: threads that move frames from WAIT to READY.

use crate::context::RunFlag;
use crate::error::{FrameBufferError, Result};
use crate::filter::{FilterChain, FilterStage};
use crate::ring::FrameRing;
use crate::slot::{FrameAttributes, FramePayload, FrameSlot, FrameStatus};
use crate::telemetry::{self, Outcome};
use crate::transform::{FrameTransform, Passthrough};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Pre filters, stream transform and post filters, in the order workers apply them.
pub struct ProcessingChain<P: FramePayload> {
    pub pre: FilterChain<P>,
    pub transform: Box<dyn FrameTransform<P>>,
    pub post: FilterChain<P>,
}

impl<P: FramePayload> Default for ProcessingChain<P> {
    fn default() -> Self {
        Self {
            pre: FilterChain::new(),
            transform: Box::new(Passthrough),
            post: FilterChain::new(),
        }
    }
}

impl<P: FramePayload> ProcessingChain<P> {
    /// Replace the stream transform.
    pub fn with_transform(mut self, transform: impl FrameTransform<P> + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }
}

/// Frame counts of a worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Frames pushed to READY, including errored ones.
    pub processed: u64,
    /// Frames dropped.
    pub skipped: u64,
    /// Duplicates created.
    pub cloned: u64,
    /// Frames that reached READY with `ERROR` set.
    pub errored: u64,
}

#[derive(Default)]
struct StatCounters {
    processed: AtomicU64,
    skipped: AtomicU64,
    cloned: AtomicU64,
    errored: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            cloned: self.cloned.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
        }
    }
}

/// State shared between a pool and its threads.
struct Shared<P: FramePayload> {
    ring: Arc<FrameRing<P>>,
    chain: Arc<ProcessingChain<P>>,
    run: RunFlag,
    running: AtomicBool,
    stats: StatCounters,
}

impl<P: FramePayload> Shared<P> {
    fn keep_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn count(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Processed => &self.stats.processed,
            Outcome::Skipped => &self.stats.skipped,
            Outcome::Cloned => &self.stats.cloned,
            Outcome::Errored => &self.stats.errored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        telemetry::record_frame(P::KIND, outcome);
    }

    fn mark_error(&self, slot: &mut FrameSlot<P>, step: &str, err: &FrameBufferError) {
        warn!(stream = %P::KIND, id = slot.id, step, error = %err, "frame processing failed");
        slot.attributes.insert(FrameAttributes::ERROR);
    }

    fn drop_frame(&self, slot: FrameSlot<P>) -> Option<FrameSlot<P>> {
        trace!(stream = %P::KIND, id = slot.id, "frame skipped");
        self.count(Outcome::Skipped);
        self.ring.remove_frame(slot);
        None
    }

    /// Run one frame through the chain and hand it to READY.
    ///
    /// With `keep`, a clone request waits for a free slot while `keep`
    /// holds; without it the request is refused when no slot is free.
    fn process(&self, slot: FrameSlot<P>, keep: Option<&dyn Fn() -> bool>) {
        let end_of_stream = slot.is_end_of_stream();
        let ready = self.run_chain(slot, keep);
        // Stop only once the last frame and its duplicates are through.
        if end_of_stream && self.running.swap(false, Ordering::AcqRel) {
            debug!(stream = %P::KIND, "end of stream, workers draining");
            self.ring.wake_stage(FrameStatus::Wait);
        }
        let Some(slot) = ready else {
            return;
        };
        if slot.has_error() {
            self.count(Outcome::Errored);
        }
        self.count(Outcome::Processed);
        trace!(stream = %P::KIND, id = slot.id, bufid = slot.bufid(), "frame ready");
        self.ring.push_next(slot, FrameStatus::Ready);
    }

    /// Filters and transform; `None` once the frame has been dropped.
    fn run_chain(
        &self,
        mut slot: FrameSlot<P>,
        keep: Option<&dyn Fn() -> bool>,
    ) -> Option<FrameSlot<P>> {
        if slot.is_skipped() {
            return self.drop_frame(slot);
        }
        if slot.attributes.contains(FrameAttributes::OUT_OF_RANGE) {
            return Some(slot);
        }
        let chain = &self.chain;
        if let Err(err) = chain.pre.process(&mut slot, FilterStage::Pre) {
            self.mark_error(&mut slot, "pre", &err);
        }
        if slot.is_skipped() {
            return self.drop_frame(slot);
        }
        if slot.attributes.contains(FrameAttributes::CLONED) {
            self.duplicate(&mut slot, keep);
        }
        if let Err(err) = chain.transform.apply(&mut slot) {
            self.mark_error(&mut slot, chain.transform.name(), &err);
        }
        if slot.is_skipped() {
            return self.drop_frame(slot);
        }
        if let Err(err) = chain.post.process(&mut slot, FilterStage::Post) {
            self.mark_error(&mut slot, "post", &err);
        }
        if slot.is_skipped() {
            return self.drop_frame(slot);
        }
        Some(slot)
    }

    /// Honor a clone request; a refused one leaves `ERROR` on the original.
    fn duplicate(&self, slot: &mut FrameSlot<P>, keep: Option<&dyn Fn() -> bool>) {
        let cloned = match keep {
            Some(keep) => self.ring.clone_frame_while(slot, true, keep),
            None => self.ring.try_clone_frame(slot, true),
        };
        if cloned {
            self.count(Outcome::Cloned);
        } else {
            let err = FrameBufferError::CloneUnavailable {
                stream: P::KIND,
                id: slot.id,
            };
            self.mark_error(slot, "clone", &err);
        }
    }
}

fn worker_loop<P: FramePayload>(shared: Arc<Shared<P>>, index: usize) {
    debug!(stream = %P::KIND, worker = index, "worker started");
    let keep = || shared.keep_running();
    while shared.run.is_running() {
        let Some(slot) = shared.ring.reserve_while(&keep) else {
            break;
        };
        shared.process(slot, Some(&keep));
    }
    debug!(stream = %P::KIND, worker = index, "worker exited");
}

/// Pool of filter threads serving one ring.
pub struct WorkerPool<P: FramePayload> {
    shared: Arc<Shared<P>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: FramePayload> WorkerPool<P> {
    /// Create an idle pool.
    pub fn new(ring: Arc<FrameRing<P>>, chain: Arc<ProcessingChain<P>>, run: RunFlag) -> Self {
        Self {
            shared: Arc::new(Shared {
                ring,
                chain,
                run,
                running: AtomicBool::new(false),
                stats: StatCounters::default(),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Ring this pool drains.
    pub fn ring(&self) -> &Arc<FrameRing<P>> {
        &self.shared.ring
    }

    /// Start `workers` threads.
    ///
    /// Does nothing while the pool is already running. Threads left over
    /// from an end-of-stream stop are joined first.
    pub fn start(&self, workers: usize) -> Result<()> {
        let mut handles = self.handles.lock();
        if self.shared.keep_running() && !handles.is_empty() {
            debug!(stream = %P::KIND, "workers already running");
            return Ok(());
        }
        join_all(&mut handles);
        if workers == 0 {
            return Ok(());
        }

        self.shared.running.store(true, Ordering::Release);
        for index in 0..workers {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{index}", P::KIND))
                .spawn(move || worker_loop(shared, index));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    warn!(stream = %P::KIND, error = %err, "failed to spawn worker");
                    self.halt();
                    join_all(&mut handles);
                    return Err(err.into());
                }
            }
        }
        info!(stream = %P::KIND, workers, "workers started");
        Ok(())
    }

    /// Ask the threads to exit without waiting for them.
    pub fn halt(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.ring.wake_stage(FrameStatus::Wait);
        self.shared.ring.wake_stage(FrameStatus::Null);
    }

    /// Stop the threads and wait for them to exit.
    ///
    /// Safe to call more than once, and after an end-of-stream stop.
    pub fn stop(&self) {
        let mut handles = self.handles.lock();
        self.halt();
        let workers = handles.len();
        join_all(&mut handles);
        if workers > 0 {
            info!(stream = %P::KIND, workers, "workers stopped");
        }
    }

    /// Check if the threads are accepting work.
    pub fn is_running(&self) -> bool {
        self.shared.keep_running()
    }

    /// Number of threads not yet joined.
    pub fn workers(&self) -> usize {
        self.handles.lock().len()
    }

    /// Frame counts so far.
    pub fn stats(&self) -> WorkerStats {
        self.shared.stats.snapshot()
    }

    /// Process one frame on the calling thread.
    ///
    /// For streams configured without workers. The caller is the only
    /// thread that could return a slot, so a clone request never blocks:
    /// without a free slot it is refused and the frame carries `ERROR`.
    pub fn process_inline(&self, slot: FrameSlot<P>) {
        self.shared.process(slot, None);
    }

    /// Process every frame currently waiting, on the calling thread.
    ///
    /// Returns the number of frames taken from WAIT.
    pub fn run_pending(&self) -> usize {
        let mut taken = 0;
        while let Some(slot) = self.shared.ring.try_reserve() {
            self.process_inline(slot);
            taken += 1;
        }
        taken
    }
}

impl<P: FramePayload> Drop for WorkerPool<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_all(handles: &mut Vec<JoinHandle<()>>) {
    for handle in handles.drain(..) {
        let name = handle.thread().name().map(str::to_owned);
        if handle.join().is_err() {
            warn!(worker = ?name, "worker thread panicked");
        }
    }
}
