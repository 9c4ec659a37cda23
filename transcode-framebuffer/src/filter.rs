//! Filter abstractions for frames moving through the WAIT stage.

use crate::error::Result;
use crate::slot::{FrameAttributes, FramePayload, FrameSlot};
use parking_lot::Mutex;
use transcode_core::SampleBuffer;

/// Point in the worker loop a filter runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterStage {
    /// Before the stream transform; clone requests are honored after this stage.
    Pre,
    /// After the stream transform.
    Post,
}

/// Filter applied to every frame of one stream.
///
/// A filter may rewrite the payload and attributes, drop the frame by
/// setting `SKIPPED`, or ask for a duplicate by setting `CLONED`.
pub trait FrameFilter<P: FramePayload>: Send {
    /// Get filter name.
    fn name(&self) -> &str;

    /// Check if filter is enabled.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Process one frame in place.
    fn process(&mut self, slot: &mut FrameSlot<P>, stage: FilterStage) -> Result<()>;
}

/// Chain of filters shared by every worker of a stream.
///
/// Each filter sits behind its own lock, so two workers only contend when
/// they reach the same filter at the same time.
pub struct FilterChain<P: FramePayload> {
    filters: Vec<Mutex<Box<dyn FrameFilter<P>>>>,
}

impl<P: FramePayload> Default for FilterChain<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: FramePayload> FilterChain<P> {
    /// Create a new empty filter chain.
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Add a filter to the chain.
    pub fn add(&mut self, filter: Box<dyn FrameFilter<P>>) {
        self.filters.push(Mutex::new(filter));
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, filter: impl FrameFilter<P> + 'static) -> Self {
        self.add(Box::new(filter));
        self
    }

    /// Get number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if chain is empty.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Names of the filters, in order.
    pub fn names(&self) -> Vec<String> {
        self.filters
            .iter()
            .map(|f| f.lock().name().to_string())
            .collect()
    }

    /// Run a frame through every enabled filter.
    ///
    /// Stops early once a filter marks the frame skipped, and at the first
    /// filter error.
    pub fn process(&self, slot: &mut FrameSlot<P>, stage: FilterStage) -> Result<()> {
        for filter in &self.filters {
            if slot.is_skipped() {
                break;
            }
            let mut filter = filter.lock();
            if filter.is_enabled() {
                filter.process(slot, stage)?;
            }
        }
        Ok(())
    }
}

/// Pass-through filter.
#[derive(Debug, Default)]
pub struct NullFilter;

impl<P: FramePayload> FrameFilter<P> for NullFilter {
    fn name(&self) -> &str {
        "null"
    }

    fn process(&mut self, _slot: &mut FrameSlot<P>, _stage: FilterStage) -> Result<()> {
        Ok(())
    }
}

/// Drops every `n`th frame, counted by frame id.
#[derive(Debug)]
pub struct DecimateFilter {
    name: String,
    every: u64,
}

impl DecimateFilter {
    /// Drop frames whose id is a multiple of `every`; zero disables it.
    pub fn new(every: u64) -> Self {
        Self {
            name: format!("decimate_{every}"),
            every,
        }
    }
}

impl<P: FramePayload> FrameFilter<P> for DecimateFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.every > 0
    }

    fn process(&mut self, slot: &mut FrameSlot<P>, stage: FilterStage) -> Result<()> {
        if stage == FilterStage::Pre && self.every > 0 && slot.id % self.every == 0 {
            slot.attributes.insert(FrameAttributes::SKIPPED);
        }
        Ok(())
    }
}

/// Duplicates every `n`th frame, counted by frame id.
#[derive(Debug)]
pub struct RepeatFilter {
    name: String,
    every: u64,
}

impl RepeatFilter {
    /// Repeat frames whose id is a multiple of `every`; zero disables it.
    pub fn new(every: u64) -> Self {
        Self {
            name: format!("repeat_{every}"),
            every,
        }
    }
}

impl<P: FramePayload> FrameFilter<P> for RepeatFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.every > 0
    }

    fn process(&mut self, slot: &mut FrameSlot<P>, stage: FilterStage) -> Result<()> {
        // Duplicates carry WAS_CLONED and come back through here.
        if stage == FilterStage::Pre
            && self.every > 0
            && slot.id % self.every == 0
            && !slot.attributes.contains(FrameAttributes::WAS_CLONED)
        {
            slot.attributes.insert(FrameAttributes::CLONED);
        }
        Ok(())
    }
}

/// Volume filter for audio level adjustment.
#[derive(Debug)]
pub struct VolumeFilter {
    name: String,
    gain: f32,
    enabled: bool,
}

impl VolumeFilter {
    /// Create a new volume filter with gain in dB.
    pub fn new(gain_db: f32) -> Self {
        Self {
            name: format!("volume_{:.1}dB", gain_db),
            gain: 10.0_f32.powf(gain_db / 20.0),
            enabled: true,
        }
    }

    /// Set gain in dB.
    pub fn set_gain_db(&mut self, gain_db: f32) {
        self.gain = 10.0_f32.powf(gain_db / 20.0);
    }

    /// Enable or disable the filter.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl FrameFilter<SampleBuffer> for VolumeFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, slot: &mut FrameSlot<SampleBuffer>, stage: FilterStage) -> Result<()> {
        if stage != FilterStage::Post {
            return Ok(());
        }
        let buffer = slot.payload_mut();
        let count = buffer.num_samples * buffer.channels as usize;
        for i in 0..count {
            if let Some(value) = buffer.sample(i) {
                buffer.set_sample(i, value * self.gain);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameBufferError;
    use transcode_core::{AudioSpec, FrameBuffer, PixelFormat, SampleFormat, VideoSpec};

    fn video_slot(id: u64) -> FrameSlot<FrameBuffer> {
        let spec = VideoSpec::new(4, 4, PixelFormat::Gray8);
        let mut slot = FrameSlot::new(0, FrameBuffer::alloc(&spec).unwrap());
        slot.id = id;
        slot
    }

    struct Failing;

    impl FrameFilter<FrameBuffer> for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn process(&mut self, _: &mut FrameSlot<FrameBuffer>, _: FilterStage) -> Result<()> {
            Err(FrameBufferError::InvalidConfig("broken filter".into()))
        }
    }

    struct Counting(u32);

    impl FrameFilter<FrameBuffer> for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn process(&mut self, slot: &mut FrameSlot<FrameBuffer>, _: FilterStage) -> Result<()> {
            self.0 += 1;
            slot.filter_id = self.0;
            Ok(())
        }
    }

    #[test]
    fn test_chain_runs_in_order() {
        let chain = FilterChain::new()
            .with(NullFilter)
            .with(Counting(0))
            .with(Counting(10));
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.names(), vec!["null", "counting", "counting"]);

        let mut slot = video_slot(1);
        chain.process(&mut slot, FilterStage::Pre).unwrap();
        assert_eq!(slot.filter_id, 11);
    }

    #[test]
    fn test_chain_stops_after_skip() {
        let chain = FilterChain::new().with(DecimateFilter::new(2)).with(Counting(0));
        let mut slot = video_slot(4);
        chain.process(&mut slot, FilterStage::Pre).unwrap();
        assert!(slot.is_skipped());
        assert_eq!(slot.filter_id, 0);

        let mut slot = video_slot(3);
        chain.process(&mut slot, FilterStage::Pre).unwrap();
        assert!(!slot.is_skipped());
        assert_eq!(slot.filter_id, 1);
    }

    #[test]
    fn test_chain_reports_filter_error() {
        let chain = FilterChain::new().with(Failing).with(Counting(0));
        let mut slot = video_slot(0);
        assert!(chain.process(&mut slot, FilterStage::Post).is_err());
        assert_eq!(slot.filter_id, 0);
    }

    #[test]
    fn test_repeat_ignores_duplicates() {
        let mut filter = RepeatFilter::new(3);
        let mut slot = video_slot(6);
        FrameFilter::<FrameBuffer>::process(&mut filter, &mut slot, FilterStage::Pre).unwrap();
        assert!(slot.attributes.contains(FrameAttributes::CLONED));

        let mut dup = video_slot(6);
        dup.attributes.insert(FrameAttributes::WAS_CLONED);
        FrameFilter::<FrameBuffer>::process(&mut filter, &mut dup, FilterStage::Pre).unwrap();
        assert!(!dup.attributes.contains(FrameAttributes::CLONED));
    }

    #[test]
    fn test_disabled_filters() {
        assert!(!FrameFilter::<FrameBuffer>::is_enabled(&DecimateFilter::new(0)));
        assert!(!FrameFilter::<FrameBuffer>::is_enabled(&RepeatFilter::new(0)));
    }

    #[test]
    fn test_volume_filter() {
        let spec = AudioSpec::new(4, 1, SampleFormat::F32, 48_000);
        let mut slot = FrameSlot::new(0, SampleBuffer::alloc(&spec).unwrap());
        slot.payload_mut().set_layout(4, 1, SampleFormat::F32).unwrap();
        for i in 0..4 {
            slot.payload_mut().set_sample(i, 0.25);
        }

        let mut filter = VolumeFilter::new(6.0206);
        filter.process(&mut slot, FilterStage::Pre).unwrap();
        assert!((slot.payload().sample(0).unwrap() - 0.25).abs() < 1e-6);

        filter.process(&mut slot, FilterStage::Post).unwrap();
        assert!((slot.payload().sample(3).unwrap() - 0.5).abs() < 1e-3);

        filter.set_enabled(false);
        assert!(!filter.is_enabled());
    }
}
