//! Pipeline configuration.

use crate::error::{FrameBufferError, Result, StreamKind};
use crate::ring::MAX_RING_SIZE;
use serde::{Deserialize, Serialize};
use transcode_core::{AudioSpec, FrameSpecs, VideoSpec};

/// Ring and worker settings for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of frame slots in the ring.
    pub ring_size: usize,
    /// Filter worker threads; zero means the host filters inline.
    pub workers: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ring_size: 8,
            workers: 2,
        }
    }
}

impl StreamConfig {
    /// Create a new stream configuration.
    pub fn new(ring_size: usize, workers: usize) -> Self {
        Self { ring_size, workers }
    }

    /// Set the ring size.
    pub fn with_ring_size(mut self, ring_size: usize) -> Self {
        self.ring_size = ring_size;
        self
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    fn validate(&self, stream: StreamKind) -> Result<()> {
        if self.ring_size > MAX_RING_SIZE {
            return Err(FrameBufferError::InvalidConfig(format!(
                "{stream} ring size {} exceeds {MAX_RING_SIZE}",
                self.ring_size
            )));
        }
        Ok(())
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Video ring and workers.
    pub video: StreamConfig,
    /// Audio ring and workers.
    pub audio: StreamConfig,
    /// Frame sizing for both streams.
    pub specs: FrameSpecs,
}

impl PipelineConfig {
    /// Set the video stream settings.
    pub fn with_video(mut self, video: StreamConfig) -> Self {
        self.video = video;
        self
    }

    /// Set the audio stream settings.
    pub fn with_audio(mut self, audio: StreamConfig) -> Self {
        self.audio = audio;
        self
    }

    /// Set the video frame spec.
    pub fn with_video_spec(mut self, spec: VideoSpec) -> Self {
        self.specs.video = spec;
        self
    }

    /// Set the audio frame spec.
    pub fn with_audio_spec(mut self, spec: AudioSpec) -> Self {
        self.specs.audio = spec;
        self
    }

    /// Check both streams before any ring is built.
    pub fn validate(&self) -> Result<()> {
        self.video.validate(StreamKind::Video)?;
        self.audio.validate(StreamKind::Audio)?;
        self.specs.validate()?;
        Ok(())
    }
}
