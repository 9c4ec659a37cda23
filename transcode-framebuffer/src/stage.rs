//! Stage pools: thread-safe exchange of slots that share one pipeline stage.
//!
//! Every stage is described by a [`StagePolicy`]: how slots are ordered
//! inside the pool and how blocked consumers are woken when one arrives.
//! FIFO stages hand out any available slot. The READY stage keeps an order
//! book keyed by the position each frame was given at registration and only
//! releases the frame at the lowest outstanding position, so consumers see
//! frames in submission order whatever order the workers finish them in.

use crate::context::RunFlag;
use crate::slot::{FramePayload, FrameSlot, FrameStatus, Position};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::warn;

/// How slots are ordered inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Any available slot, oldest first.
    Fifo,
    /// Strictly by registration position.
    Ordered,
}

/// How blocked consumers are woken on insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Wake one consumer.
    Signal,
    /// Wake every consumer so each re-checks its predicate.
    Broadcast,
}

/// Ordering and wakeup rules for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
    pub discipline: Discipline,
    pub wakeup: Wakeup,
}

impl StagePolicy {
    /// Policy table for every status.
    pub const fn for_status(status: FrameStatus) -> Self {
        match status {
            FrameStatus::Null | FrameStatus::Empty => Self {
                discipline: Discipline::Fifo,
                wakeup: Wakeup::Signal,
            },
            // Workers race for the same work.
            FrameStatus::Wait | FrameStatus::Locked => Self {
                discipline: Discipline::Fifo,
                wakeup: Wakeup::Broadcast,
            },
            FrameStatus::Ready => Self {
                discipline: Discipline::Ordered,
                wakeup: Wakeup::Signal,
            },
        }
    }
}

/// Positions handed out to registered frames plus the frames parked in READY.
struct OrderBook<P> {
    next_seq: u64,
    outstanding: BTreeSet<Position>,
    parked: BTreeMap<Position, FrameSlot<P>>,
}

impl<P: FramePayload> OrderBook<P> {
    fn new() -> Self {
        Self {
            next_seq: 0,
            outstanding: BTreeSet::new(),
            parked: BTreeMap::new(),
        }
    }

    fn head(&self) -> Option<Position> {
        self.outstanding.first().copied()
    }

    fn consumable(&self) -> bool {
        self.head().is_some_and(|head| self.parked.contains_key(&head))
    }

    fn announce(&mut self) -> Position {
        let position = Position {
            seq: self.next_seq,
            clone: 0,
        };
        self.next_seq += 1;
        self.outstanding.insert(position);
        position
    }

    fn announce_clone(&mut self, parent: Position) -> Position {
        let family = Position {
            seq: parent.seq,
            clone: 0,
        }..=Position {
            seq: parent.seq,
            clone: u32::MAX,
        };
        let last = self
            .outstanding
            .range(family)
            .next_back()
            .map_or(parent.clone, |p| p.clone.max(parent.clone));
        let position = Position {
            seq: parent.seq,
            clone: last + 1,
        };
        self.outstanding.insert(position);
        position
    }

    fn push(&mut self, mut slot: FrameSlot<P>) -> bool {
        if self.parked.contains_key(&slot.position()) {
            debug_assert!(false, "two slots parked at {:?}", slot.position());
            warn!(bufid = slot.bufid(), "duplicate ready position, reordering at tail");
            let position = self.announce();
            slot.set_position(position);
        }
        let position = slot.position();
        self.outstanding.insert(position);
        self.parked.insert(position, slot);
        self.head() == Some(position)
    }

    fn pop(&mut self) -> Option<FrameSlot<P>> {
        let head = self.head()?;
        let slot = self.parked.remove(&head)?;
        self.outstanding.remove(&head);
        Some(slot)
    }

    fn drain(&mut self) -> Vec<FrameSlot<P>> {
        self.outstanding.clear();
        std::mem::take(&mut self.parked).into_values().collect()
    }
}

enum StageQueue<P> {
    Fifo(VecDeque<FrameSlot<P>>),
    Ordered(OrderBook<P>),
}

impl<P: FramePayload> StageQueue<P> {
    fn pop(&mut self) -> Option<FrameSlot<P>> {
        match self {
            Self::Fifo(queue) => queue.pop_front(),
            Self::Ordered(book) => book.pop(),
        }
    }

    fn push(&mut self, slot: FrameSlot<P>) -> bool {
        match self {
            Self::Fifo(queue) => {
                queue.push_back(slot);
                true
            }
            Self::Ordered(book) => book.push(slot),
        }
    }

    fn consumable(&self) -> bool {
        match self {
            Self::Fifo(queue) => !queue.is_empty(),
            Self::Ordered(book) => book.consumable(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Fifo(queue) => queue.len(),
            Self::Ordered(book) => book.parked.len(),
        }
    }

    fn drain(&mut self) -> Vec<FrameSlot<P>> {
        match self {
            Self::Fifo(queue) => queue.drain(..).collect(),
            Self::Ordered(book) => book.drain(),
        }
    }
}

struct StageState<P> {
    queue: StageQueue<P>,
    waiting: usize,
}

/// Pool of the slots currently queued in one stage.
pub struct StagePool<P> {
    status: FrameStatus,
    policy: StagePolicy,
    state: Mutex<StageState<P>>,
    available: Condvar,
    run: RunFlag,
}

impl<P: FramePayload> StagePool<P> {
    /// Create the pool for a stage, observing the given run flag.
    pub fn new(status: FrameStatus, run: RunFlag) -> Self {
        let policy = StagePolicy::for_status(status);
        let queue = match policy.discipline {
            Discipline::Fifo => StageQueue::Fifo(VecDeque::new()),
            Discipline::Ordered => StageQueue::Ordered(OrderBook::new()),
        };
        Self {
            status,
            policy,
            state: Mutex::new(StageState { queue, waiting: 0 }),
            available: Condvar::new(),
            run,
        }
    }

    /// Status of the slots in this pool.
    pub fn status(&self) -> FrameStatus {
        self.status
    }

    /// Ordering and wakeup rules.
    pub fn policy(&self) -> StagePolicy {
        self.policy
    }

    /// Block until a slot is available.
    ///
    /// Returns `None` once the pipeline stops running and nothing is left
    /// to hand out.
    pub fn get(&self) -> Option<FrameSlot<P>> {
        self.get_while(|| true)
    }

    /// Like [`get`](Self::get), also giving up when `keep` turns false.
    ///
    /// `keep` is evaluated under the pool lock; flip it, then call
    /// [`wake`](Self::wake) to release blocked callers.
    pub fn get_while(&self, keep: impl Fn() -> bool) -> Option<FrameSlot<P>> {
        let mut state = self.state.lock();
        loop {
            if let Some(slot) = state.queue.pop() {
                // The next ordered frame may already be parked behind this one.
                if state.waiting > 0 && state.queue.consumable() {
                    self.available.notify_one();
                }
                return Some(slot);
            }
            if !self.run.is_running() || !keep() {
                return None;
            }
            state.waiting += 1;
            self.available.wait(&mut state);
            state.waiting -= 1;
        }
    }

    /// Take a slot if one is available right now.
    pub fn try_get(&self) -> Option<FrameSlot<P>> {
        self.state.lock().queue.pop()
    }

    /// Insert a slot and wake consumers per the stage policy.
    ///
    /// Returns whether the slot can be consumed immediately; an ordered
    /// slot that arrives ahead of its predecessor waits its turn.
    pub fn put(&self, slot: FrameSlot<P>) -> bool {
        let mut state = self.state.lock();
        let consumable = state.queue.push(slot);
        if consumable && state.waiting > 0 {
            match self.policy.wakeup {
                Wakeup::Signal => {
                    self.available.notify_one();
                }
                Wakeup::Broadcast => {
                    self.available.notify_all();
                }
            }
        }
        consumable
    }

    /// Wake every blocked consumer so it re-checks its predicate.
    pub fn wake(&self) {
        let _state = self.state.lock();
        self.available.notify_all();
    }

    /// Check if a `get` would return a slot right now.
    pub(crate) fn consumable(&self) -> bool {
        self.state.lock().queue.consumable()
    }

    /// Slots currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumers currently blocked in `get`.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    /// Remove every queued slot; an ordered pool also forgets outstanding positions.
    pub(crate) fn drain(&self) -> Vec<FrameSlot<P>> {
        self.state.lock().queue.drain()
    }

    /// Hand out the next output position.
    pub(crate) fn announce(&self) -> Position {
        let mut state = self.state.lock();
        match &mut state.queue {
            StageQueue::Ordered(book) => book.announce(),
            StageQueue::Fifo(_) => {
                debug_assert!(false, "{} stage does not order frames", self.status);
                Position::default()
            }
        }
    }

    /// Hand out the position directly after `parent` and its earlier clones.
    pub(crate) fn announce_clone(&self, parent: Position) -> Position {
        let mut state = self.state.lock();
        match &mut state.queue {
            StageQueue::Ordered(book) => book.announce_clone(parent),
            StageQueue::Fifo(_) => {
                debug_assert!(false, "{} stage does not order frames", self.status);
                parent
            }
        }
    }

    /// Forget a position whose frame will never arrive.
    pub(crate) fn retire(&self, position: Position) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let StageQueue::Ordered(book) = &mut state.queue {
            if book.outstanding.remove(&position) && state.waiting > 0 && book.consumable() {
                self.available.notify_one();
            }
        }
    }
}
