//! Pipeline context: the rings, chains and workers of one pipeline run.

use crate::config::PipelineConfig;
use crate::error::{Result, StreamKind};
use crate::filter::{FilterStage, FrameFilter};
use crate::ring::{FrameRing, StageCounters};
use crate::slot::FrameStatus;
use crate::transform::FrameTransform;
use crate::worker::{ProcessingChain, WorkerPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use transcode_core::{FrameBuffer, SampleBuffer};

/// Shared "pipeline is running" flag observed by every blocking call.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunFlag {
    /// Create a flag in the running state.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Check if the pipeline is still running.
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag. Returns whether it was set.
    pub fn stop(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Builder for [`PipelineContext`].
pub struct PipelineContextBuilder {
    config: PipelineConfig,
    video: ProcessingChain<FrameBuffer>,
    audio: ProcessingChain<SampleBuffer>,
}

impl PipelineContextBuilder {
    /// Add a video filter.
    pub fn video_filter(
        mut self,
        stage: FilterStage,
        filter: impl FrameFilter<FrameBuffer> + 'static,
    ) -> Self {
        match stage {
            FilterStage::Pre => self.video.pre.add(Box::new(filter)),
            FilterStage::Post => self.video.post.add(Box::new(filter)),
        }
        self
    }

    /// Add an audio filter.
    pub fn audio_filter(
        mut self,
        stage: FilterStage,
        filter: impl FrameFilter<SampleBuffer> + 'static,
    ) -> Self {
        match stage {
            FilterStage::Pre => self.audio.pre.add(Box::new(filter)),
            FilterStage::Post => self.audio.post.add(Box::new(filter)),
        }
        self
    }

    /// Set the video transform.
    pub fn video_transform(mut self, transform: impl FrameTransform<FrameBuffer> + 'static) -> Self {
        self.video.transform = Box::new(transform);
        self
    }

    /// Set the audio transform.
    pub fn audio_transform(
        mut self,
        transform: impl FrameTransform<SampleBuffer> + 'static,
    ) -> Self {
        self.audio.transform = Box::new(transform);
        self
    }

    /// Validate the configuration and allocate both rings.
    ///
    /// Workers are not started.
    pub fn build(self) -> Result<PipelineContext> {
        self.config.validate()?;
        let run = RunFlag::new();
        let specs = &self.config.specs;
        let video_ring = Arc::new(FrameRing::new(
            specs.video.clone(),
            self.config.video.ring_size,
            run.clone(),
        )?);
        let audio_ring = Arc::new(FrameRing::new(
            specs.audio.clone(),
            self.config.audio.ring_size,
            run.clone(),
        )?);
        let video = WorkerPool::new(video_ring, Arc::new(self.video), run.clone());
        let audio = WorkerPool::new(audio_ring, Arc::new(self.audio), run.clone());
        info!(
            video_slots = video.ring().size(),
            audio_slots = audio.ring().size(),
            "pipeline context ready"
        );
        Ok(PipelineContext {
            config: self.config,
            run,
            video,
            audio,
        })
    }
}

/// Everything one pipeline run shares between its threads.
pub struct PipelineContext {
    config: PipelineConfig,
    run: RunFlag,
    video: WorkerPool<FrameBuffer>,
    audio: WorkerPool<SampleBuffer>,
}

impl PipelineContext {
    /// Start building a context from a configuration.
    pub fn builder(config: PipelineConfig) -> PipelineContextBuilder {
        PipelineContextBuilder {
            config,
            video: ProcessingChain::default(),
            audio: ProcessingChain::default(),
        }
    }

    /// Build a context without filters.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Configuration the context was built from.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Video frame ring.
    pub fn video(&self) -> &Arc<FrameRing<FrameBuffer>> {
        self.video.ring()
    }

    /// Audio frame ring.
    pub fn audio(&self) -> &Arc<FrameRing<SampleBuffer>> {
        self.audio.ring()
    }

    /// Video worker pool.
    pub fn video_workers(&self) -> &WorkerPool<FrameBuffer> {
        &self.video
    }

    /// Audio worker pool.
    pub fn audio_workers(&self) -> &WorkerPool<SampleBuffer> {
        &self.audio
    }

    /// Start both worker pools with their configured thread counts.
    ///
    /// A stream configured with zero workers is processed inline through
    /// [`WorkerPool::run_pending`] or [`WorkerPool::process_inline`].
    pub fn start_workers(&self) -> Result<()> {
        self.video.start(self.config.video.workers)?;
        if let Err(err) = self.audio.start(self.config.audio.workers) {
            self.video.stop();
            return Err(err);
        }
        Ok(())
    }

    /// Stop both worker pools and join their threads.
    pub fn stop_workers(&self) {
        self.video.stop();
        self.audio.stop();
    }

    /// Check if the pipeline has not been interrupted.
    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }

    /// Cancel every blocked and future blocking call.
    ///
    /// Blocking calls return `None` from now on, once their stage is empty.
    pub fn interrupt(&self) {
        if self.run.stop() {
            info!("pipeline interrupted");
        }
        self.video.halt();
        self.audio.halt();
        self.video.ring().wake_all();
        self.audio.ring().wake_all();
    }

    /// Wake every consumer blocked on one stage of one stream.
    pub fn wake_stage(&self, stream: StreamKind, status: FrameStatus) {
        match stream {
            StreamKind::Video => self.video().wake_stage(status),
            StreamKind::Audio => self.audio().wake_stage(status),
        }
    }

    /// Return every queued slot of both rings to the free pool.
    ///
    /// Only valid while no thread holds a slot. Returns the number of
    /// video and audio slots moved.
    pub fn flush(&self) -> (usize, usize) {
        (self.video().flush(), self.audio().flush())
    }

    /// Stage census of the video and audio rings.
    pub fn counters(&self) -> (StageCounters, StageCounters) {
        (self.video().counters(), self.audio().counters())
    }

    /// Log the state of both rings.
    pub fn dump_status(&self) {
        debug!(
            running = self.is_running(),
            video_workers = self.video.workers(),
            audio_workers = self.audio.workers(),
            "pipeline status"
        );
        self.video().dump_status();
        self.audio().dump_status();
    }

    /// Stop the workers and return every slot to the free pool.
    pub fn shutdown(self) {
        self.stop_workers();
        let (video, audio) = self.flush();
        debug!(video, audio, "flushed on shutdown");
        for (stream, counters, size) in [
            (StreamKind::Video, self.video().counters(), self.video().size()),
            (StreamKind::Audio, self.audio().counters(), self.audio().size()),
        ] {
            if counters.null != size {
                warn!(
                    %stream,
                    missing = size - counters.null,
                    "slots still held at shutdown"
                );
            }
        }
        info!("pipeline context shut down");
    }
}
