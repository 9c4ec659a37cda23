//! Stream specs shared by every stage of a pipeline.

use crate::error::Result;
use crate::frame::VideoSpec;
use crate::sample::AudioSpec;
use serde::{Deserialize, Serialize};

/// Frame specs for both streams of a pipeline.
///
/// Fixed once the pipeline is configured; the rings size their slots from
/// these and every worker may read them concurrently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSpecs {
    /// Video stream sizing.
    pub video: VideoSpec,
    /// Audio stream sizing.
    pub audio: AudioSpec,
}

impl FrameSpecs {
    /// Create specs from both stream records.
    pub fn new(video: VideoSpec, audio: AudioSpec) -> Self {
        Self { video, audio }
    }

    /// Validate both streams.
    pub fn validate(&self) -> Result<()> {
        self.video.validate()?;
        self.audio.validate()
    }
}
