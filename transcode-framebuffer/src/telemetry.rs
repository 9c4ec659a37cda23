//! Optional metrics for ring occupancy and worker throughput.
//!
//! Recorded through the `metrics` facade when the `metrics` feature is
//! enabled. When disabled, all operations are no-ops.
//!
//! # Metric Names
//!
//! - `framebuffer.stage.slots` - gauge, slots per stage (`stream`, `stage`)
//! - `framebuffer.worker.frames` - counter, frames handled by workers
//!   (`stream`, `outcome`)

use crate::error::StreamKind;
use crate::ring::StageCounters;

/// What a worker did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Processed,
    Skipped,
    Cloned,
    Errored,
}

impl Outcome {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Skipped => "skipped",
            Self::Cloned => "cloned",
            Self::Errored => "errored",
        }
    }
}

#[cfg(feature = "metrics")]
pub(crate) fn record_census(stream: StreamKind, counters: &StageCounters) {
    for (stage, slots) in counters.by_stage() {
        ::metrics::gauge!(
            "framebuffer.stage.slots",
            "stream" => stream.as_str(),
            "stage" => stage
        )
        .set(slots as f64);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_census(stream: StreamKind, counters: &StageCounters) {
    let _ = (stream, counters);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_frame(stream: StreamKind, outcome: Outcome) {
    ::metrics::counter!(
        "framebuffer.worker.frames",
        "stream" => stream.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_frame(stream: StreamKind, outcome: Outcome) {
    let _ = (stream, outcome);
}
