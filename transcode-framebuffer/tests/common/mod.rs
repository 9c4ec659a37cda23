//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use transcode_framebuffer::{
    FrameBuffer, FrameRing, FrameSlot, FrameTransform, PixelFormat, Result, RunFlag, VideoSpec,
};

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn video_ring(size: usize, run: &RunFlag) -> Arc<FrameRing<FrameBuffer>> {
    let spec = VideoSpec::new(16, 16, PixelFormat::Gray8);
    Arc::new(FrameRing::new(spec, size, run.clone()).unwrap())
}

/// Sleeps a per-frame delay so workers finish out of order.
pub struct Jitter {
    delays: Vec<u64>,
}

impl Jitter {
    pub fn new(delays: Vec<u64>) -> Self {
        Self { delays }
    }
}

impl FrameTransform<FrameBuffer> for Jitter {
    fn name(&self) -> &str {
        "jitter"
    }

    fn apply(&self, slot: &mut FrameSlot<FrameBuffer>) -> Result<()> {
        if !self.delays.is_empty() {
            let delay = self.delays[slot.id as usize % self.delays.len()];
            thread::sleep(Duration::from_micros(delay));
        }
        Ok(())
    }
}
