//! Frame slots: the reusable unit that cycles through the pipeline stages.

use crate::error::StreamKind;
use bitflags::bitflags;
use std::fmt;
use std::ops::Deref;
use transcode_core::{AudioSpec, FrameBuffer, SampleBuffer, VideoSpec};

/// Payload carried by a slot, allocated once per slot from the stream spec.
pub trait FramePayload: Clone + Send + Sized + 'static {
    /// Sizing record the payload is allocated from.
    type Spec: Clone + fmt::Debug + Send + Sync + 'static;

    /// Stream this payload belongs to.
    const KIND: StreamKind;

    /// Check a spec before any slot is allocated from it.
    fn validate(spec: &Self::Spec) -> transcode_core::Result<()>;

    /// Allocate a payload large enough for anything the sizing record allows.
    fn alloc(spec: &Self::Spec) -> transcode_core::Result<Self>;

    /// Restore the default working geometry when the slot is re-registered.
    fn reset(&mut self, spec: &Self::Spec);

    /// Copy the live bytes (and geometry) of another payload.
    fn copy_from(&mut self, other: &Self) -> transcode_core::Result<()>;

    /// Bytes of live data.
    fn size(&self) -> usize;
}

impl FramePayload for FrameBuffer {
    type Spec = VideoSpec;
    const KIND: StreamKind = StreamKind::Video;

    fn validate(spec: &VideoSpec) -> transcode_core::Result<()> {
        spec.validate()
    }

    fn alloc(spec: &VideoSpec) -> transcode_core::Result<Self> {
        FrameBuffer::alloc(spec)
    }

    fn reset(&mut self, spec: &VideoSpec) {
        let reset = self.set_geometry(spec.width, spec.height, spec.format);
        debug_assert!(reset.is_ok(), "validated spec must fit its own buffers");
    }

    fn copy_from(&mut self, other: &Self) -> transcode_core::Result<()> {
        FrameBuffer::copy_from(self, other)
    }

    fn size(&self) -> usize {
        FrameBuffer::size(self)
    }
}

impl FramePayload for SampleBuffer {
    type Spec = AudioSpec;
    const KIND: StreamKind = StreamKind::Audio;

    fn validate(spec: &AudioSpec) -> transcode_core::Result<()> {
        spec.validate()
    }

    fn alloc(spec: &AudioSpec) -> transcode_core::Result<Self> {
        SampleBuffer::alloc(spec)
    }

    fn reset(&mut self, spec: &AudioSpec) {
        self.num_samples = 0;
        self.channels = spec.channels;
        self.format = spec.format;
        self.sample_rate = spec.sample_rate;
    }

    fn copy_from(&mut self, other: &Self) -> transcode_core::Result<()> {
        SampleBuffer::copy_from(self, other)
    }

    fn size(&self) -> usize {
        SampleBuffer::size(self)
    }
}

/// Pipeline stage a slot is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStatus {
    /// Free, owned by the ring.
    Null,
    /// Registered by the producer, payload being filled.
    Empty,
    /// Filled, waiting for filtering.
    Wait,
    /// Reserved by a worker. Shares the WAIT stage.
    Locked,
    /// Processed, waiting for the consumer.
    Ready,
}

impl FrameStatus {
    /// Stage whose pool holds slots of this status.
    pub(crate) fn stage(self) -> Stage {
        match self {
            Self::Null => Stage::Null,
            Self::Empty => Stage::Empty,
            Self::Wait | Self::Locked => Stage::Wait,
            Self::Ready => Stage::Ready,
        }
    }
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Empty => write!(f, "empty"),
            Self::Wait => write!(f, "wait"),
            Self::Locked => write!(f, "locked"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// One of the four physical stages; `Locked` folds into `Wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Stage {
    Null = 0,
    Empty = 1,
    Wait = 2,
    Ready = 3,
}

impl Stage {
    pub(crate) const ALL: [Stage; 4] = [Stage::Null, Stage::Empty, Stage::Wait, Stage::Ready];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub(crate) fn status(self) -> FrameStatus {
        match self {
            Stage::Null => FrameStatus::Null,
            Stage::Empty => FrameStatus::Empty,
            Stage::Wait => FrameStatus::Wait,
            Stage::Ready => FrameStatus::Ready,
        }
    }
}

bitflags! {
    /// Per-frame attributes set by producers, filters and workers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameAttributes: u32 {
        /// This is a keyframe.
        const KEYFRAME = 0x0001;
        /// Drop this frame; it is removed instead of reaching READY.
        const SKIPPED = 0x0002;
        /// A filter asks for this frame to be duplicated.
        const CLONED = 0x0004;
        /// This frame is the duplicate of another one.
        const WAS_CLONED = 0x0008;
        /// Last frame of the stream.
        const END_OF_STREAM = 0x0010;
        /// Outside the selected range; passed through untouched.
        const OUT_OF_RANGE = 0x0020;
        /// A filter or transform failed on this frame.
        const ERROR = 0x0040;
    }
}

/// Place of a frame in the output order.
///
/// `seq` is handed out at registration and never wraps; clones of a frame
/// share its `seq` and follow it through increasing `clone` indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub(crate) struct Position {
    pub(crate) seq: u64,
    pub(crate) clone: u32,
}

/// A reusable buffer plus the metadata describing the frame it holds.
pub struct FrameSlot<P> {
    bufid: usize,
    status: FrameStatus,
    position: Position,
    /// Logical frame number assigned by the producer.
    pub id: u64,
    /// Frame attributes.
    pub attributes: FrameAttributes,
    /// Filter bookkeeping, free for the filter chain to use.
    pub filter_id: u32,
    payload: P,
}

impl<P: FramePayload> FrameSlot<P> {
    pub(crate) fn new(bufid: usize, payload: P) -> Self {
        Self {
            bufid,
            status: FrameStatus::Null,
            position: Position::default(),
            id: 0,
            attributes: FrameAttributes::empty(),
            filter_id: 0,
            payload,
        }
    }

    /// Physical slot index, stable for the life of the ring.
    pub fn bufid(&self) -> usize {
        self.bufid
    }

    /// Stage the slot was last moved to.
    pub fn status(&self) -> FrameStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: FrameStatus) {
        self.status = status;
    }

    pub(crate) fn position(&self) -> Position {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    /// Clear per-frame metadata for a new registration.
    pub(crate) fn reset(&mut self, id: u64, spec: &P::Spec) {
        self.id = id;
        self.attributes = FrameAttributes::empty();
        self.filter_id = 0;
        self.payload.reset(spec);
    }

    /// Get the payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Get a mutable reference to the payload.
    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    /// Check if the frame should be dropped.
    pub fn is_skipped(&self) -> bool {
        self.attributes.contains(FrameAttributes::SKIPPED)
    }

    /// Check if the frame closes the stream.
    pub fn is_end_of_stream(&self) -> bool {
        self.attributes.contains(FrameAttributes::END_OF_STREAM)
    }

    /// Check if processing failed on this frame.
    pub fn has_error(&self) -> bool {
        self.attributes.contains(FrameAttributes::ERROR)
    }

    /// Copy metadata from `src`, and its payload bytes when `copy_data` is set.
    ///
    /// Buffer id, status and ordering position stay with `self`.
    pub fn copy(&mut self, src: &FrameSlot<P>, copy_data: bool) -> transcode_core::Result<()> {
        self.id = src.id;
        self.attributes = src.attributes;
        self.filter_id = src.filter_id;
        if copy_data {
            self.payload.copy_from(&src.payload)?;
        }
        Ok(())
    }

    /// Take a copy of this frame, deep or aliased.
    ///
    /// With `copy_data` unset the payload is borrowed, so the copy cannot
    /// outlive the slot.
    pub fn snapshot(&self, copy_data: bool) -> FrameCopy<'_, P> {
        FrameCopy {
            id: self.id,
            attributes: self.attributes,
            filter_id: self.filter_id,
            payload: if copy_data {
                PayloadRef::Owned(self.payload.clone())
            } else {
                PayloadRef::Borrowed(&self.payload)
            },
        }
    }
}

impl<P: FramePayload + fmt::Debug> fmt::Debug for FrameSlot<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSlot")
            .field("bufid", &self.bufid)
            .field("id", &self.id)
            .field("status", &self.status)
            .field("attributes", &self.attributes)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Payload either owned by a copy or borrowed from the slot it was taken from.
#[derive(Debug)]
pub enum PayloadRef<'a, P> {
    Owned(P),
    Borrowed(&'a P),
}

impl<P: Clone> PayloadRef<'_, P> {
    /// Check if this copy owns its bytes.
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Detach from the source slot, cloning if needed.
    pub fn into_owned(self) -> P {
        match self {
            Self::Owned(p) => p,
            Self::Borrowed(p) => p.clone(),
        }
    }
}

impl<P> Deref for PayloadRef<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        match self {
            Self::Owned(p) => p,
            Self::Borrowed(p) => p,
        }
    }
}

/// Metadata plus payload captured by [`FrameSlot::snapshot`].
#[derive(Debug)]
pub struct FrameCopy<'a, P> {
    pub id: u64,
    pub attributes: FrameAttributes,
    pub filter_id: u32,
    pub payload: PayloadRef<'a, P>,
}
