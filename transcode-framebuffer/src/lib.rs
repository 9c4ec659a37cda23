//! Frame ring buffer and worker scheduling for the Transcode pipeline.
//!
//! Every stream owns a [`FrameRing`]: a fixed set of preallocated frame
//! slots that cycle through four stages. The producer registers a free slot
//! (NULL → EMPTY), fills it and queues it for filtering (WAIT). Workers
//! reserve frames, run the filter chain and hand them on (READY). The
//! consumer takes READY frames in submission order and returns the slot to
//! the free pool.
//!
//! ```ignore
//! use transcode_framebuffer::{FrameStatus, PipelineConfig, PipelineContext};
//!
//! let ctx = PipelineContext::new(PipelineConfig::default())?;
//! ctx.start_workers()?;
//!
//! let mut slot = ctx.video().register_frame(0, FrameStatus::Empty).unwrap();
//! slot.payload_mut().fill(16);
//! ctx.video().push_next(slot, FrameStatus::Wait);
//!
//! let frame = ctx.video().retrieve_ready().unwrap();
//! ctx.video().remove_frame(frame);
//! ctx.shutdown();
//! ```

mod config;
mod context;
mod error;
mod filter;
mod ring;
mod slot;
mod stage;
mod telemetry;
mod transform;
mod worker;

pub use config::{PipelineConfig, StreamConfig};
pub use context::{PipelineContext, PipelineContextBuilder, RunFlag};
pub use error::{FrameBufferError, Result, StreamKind};
pub use filter::{
    DecimateFilter, FilterChain, FilterStage, FrameFilter, NullFilter, RepeatFilter, VolumeFilter,
};
pub use ring::{FrameRing, StageCounters, MAX_RING_SIZE};
pub use slot::{FrameAttributes, FrameCopy, FramePayload, FrameSlot, FrameStatus, PayloadRef};
pub use stage::{Discipline, StagePolicy, StagePool, Wakeup};
pub use transform::{ColorConvert, FrameTransform, Passthrough, SampleConvert};
pub use worker::{ProcessingChain, WorkerPool, WorkerStats};

pub use transcode_core::{
    AudioSpec, FrameBuffer, FrameSpecs, PixelFormat, SampleBuffer, SampleFormat, VideoSpec,
};
