//! Per-stream transforms run by workers between the pre and post filters.

use crate::error::Result;
use crate::slot::{FramePayload, FrameSlot};
use transcode_core::{FrameBuffer, PixelFormat, SampleBuffer, SampleFormat};

/// Stream-level processing step shared by all workers of a stream.
pub trait FrameTransform<P: FramePayload>: Send + Sync {
    /// Get transform name.
    fn name(&self) -> &str;

    /// Transform one frame in place.
    fn apply(&self, slot: &mut FrameSlot<P>) -> Result<()>;
}

/// Leaves frames untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl<P: FramePayload> FrameTransform<P> for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn apply(&self, _slot: &mut FrameSlot<P>) -> Result<()> {
        Ok(())
    }
}

/// Converts video frames to one pixel format.
#[derive(Debug, Clone, Copy)]
pub struct ColorConvert {
    /// Pixel format every frame leaves in.
    pub target: PixelFormat,
}

impl ColorConvert {
    /// Create a new color conversion to `target`.
    pub fn new(target: PixelFormat) -> Self {
        Self { target }
    }
}

impl FrameTransform<FrameBuffer> for ColorConvert {
    fn name(&self) -> &str {
        "color_convert"
    }

    fn apply(&self, slot: &mut FrameSlot<FrameBuffer>) -> Result<()> {
        slot.payload_mut().convert_to(self.target)?;
        Ok(())
    }
}

/// Converts audio chunks to one sample format.
#[derive(Debug, Clone, Copy)]
pub struct SampleConvert {
    /// Sample format every chunk leaves in.
    pub target: SampleFormat,
}

impl SampleConvert {
    /// Create a new sample conversion to `target`.
    pub fn new(target: SampleFormat) -> Self {
        Self { target }
    }
}

impl FrameTransform<SampleBuffer> for SampleConvert {
    fn name(&self) -> &str {
        "sample_convert"
    }

    fn apply(&self, slot: &mut FrameSlot<SampleBuffer>) -> Result<()> {
        slot.payload_mut().convert_to(self.target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcode_core::{AudioSpec, VideoSpec};

    #[test]
    fn test_color_convert_rgb_to_gray() {
        let spec = VideoSpec::new(4, 2, PixelFormat::Rgb24);
        let mut slot = FrameSlot::new(0, FrameBuffer::alloc(&spec).unwrap());
        slot.payload_mut().fill(200);

        ColorConvert::new(PixelFormat::Gray8).apply(&mut slot).unwrap();
        let frame = slot.payload();
        assert_eq!(frame.format, PixelFormat::Gray8);
        assert_eq!(frame.size(), 8);
    }

    #[test]
    fn test_color_convert_unsupported_pair() {
        let spec = VideoSpec::new(4, 2, PixelFormat::Gray8);
        let mut slot = FrameSlot::new(0, FrameBuffer::alloc(&spec).unwrap());
        let err = ColorConvert::new(PixelFormat::Rgba).apply(&mut slot).unwrap_err();
        assert!(matches!(
            err,
            crate::error::FrameBufferError::Core(transcode_core::Error::Unsupported(_))
        ));
        assert_eq!(slot.payload().format, PixelFormat::Gray8);
    }

    #[test]
    fn test_sample_convert() {
        let spec = AudioSpec::new(8, 2, SampleFormat::S16, 44_100);
        let mut slot = FrameSlot::new(0, SampleBuffer::alloc(&spec).unwrap());
        slot.payload_mut().set_layout(8, 2, SampleFormat::S16).unwrap();
        slot.payload_mut().set_sample(0, -0.5);

        SampleConvert::new(SampleFormat::F32).apply(&mut slot).unwrap();
        assert_eq!(slot.payload().format, SampleFormat::F32);
        assert!((slot.payload().sample(0).unwrap() + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_passthrough() {
        let spec = AudioSpec::new(8, 2, SampleFormat::S16, 44_100);
        let mut slot = FrameSlot::new(0, SampleBuffer::alloc(&spec).unwrap());
        FrameTransform::<SampleBuffer>::apply(&Passthrough, &mut slot).unwrap();
        assert_eq!(FrameTransform::<SampleBuffer>::name(&Passthrough), "passthrough");
    }
}
