//! Video frame buffer abstractions.
//!
//! A [`FrameBuffer`] is allocated once for the largest picture a stream may
//! carry and then reused for every frame that passes through its slot. The
//! working geometry (width, height, pixel format) may change from frame to
//! frame as long as it fits the allocation.

use crate::error::{try_zeroed, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest number of bytes any supported pixel format needs per pixel.
pub const MAX_BYTES_PER_PIXEL: usize = 4;

/// Pixel format for video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, 12bpp (1 Cr & Cb sample per 2x2 Y samples).
    #[default]
    Yuv420p,
    /// Planar YUV 4:2:2, 16bpp (1 Cr & Cb sample per 2x1 Y samples).
    Yuv422p,
    /// Planar YUV 4:4:4, 24bpp (no subsampling).
    Yuv444p,
    /// Packed RGB24, 24bpp.
    Rgb24,
    /// Packed RGBA, 32bpp.
    Rgba,
    /// Grayscale, 8bpp.
    Gray8,
}

impl PixelFormat {
    /// Get the number of planes for this pixel format.
    pub fn num_planes(&self) -> usize {
        match self {
            Self::Yuv420p | Self::Yuv422p | Self::Yuv444p => 3,
            Self::Rgb24 | Self::Rgba | Self::Gray8 => 1,
        }
    }

    /// Get chroma subsampling factors (horizontal, vertical).
    pub fn chroma_subsampling(&self) -> (u32, u32) {
        match self {
            Self::Yuv420p => (2, 2),
            Self::Yuv422p => (2, 1),
            _ => (1, 1),
        }
    }

    /// Dimensions of one plane, rounding subsampled planes up.
    pub fn plane_dimensions(&self, plane: usize, width: u32, height: u32) -> (usize, usize) {
        if plane == 0 {
            return (width as usize, height as usize);
        }
        let (hsub, vsub) = self.chroma_subsampling();
        (
            width.div_ceil(hsub) as usize,
            height.div_ceil(vsub) as usize,
        )
    }

    /// Bytes per sample within a plane.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Rgba => 4,
            _ => 1,
        }
    }

    /// Calculate the size of a plane for given dimensions.
    pub fn plane_size(&self, plane: usize, width: u32, height: u32) -> usize {
        if plane >= self.num_planes() {
            return 0;
        }
        let (w, h) = self.plane_dimensions(plane, width, height);
        w.saturating_mul(h).saturating_mul(self.bytes_per_pixel())
    }

    /// Total bytes of a tightly packed picture.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        (0..self.num_planes())
            .map(|p| self.plane_size(p, width, height))
            .fold(0, usize::saturating_add)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yuv420p => write!(f, "yuv420p"),
            Self::Yuv422p => write!(f, "yuv422p"),
            Self::Yuv444p => write!(f, "yuv444p"),
            Self::Rgb24 => write!(f, "rgb24"),
            Self::Rgba => write!(f, "rgba"),
            Self::Gray8 => write!(f, "gray8"),
        }
    }
}

/// Sizing record for a video stream.
///
/// `max_width`/`max_height` bound every frame the stream may ever carry; the
/// plain `width`/`height`/`format` are the geometry a slot is reset to when
/// it is registered for a new frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSpec {
    /// Largest supported width.
    pub max_width: u32,
    /// Largest supported height.
    pub max_height: u32,
    /// Default frame width.
    pub width: u32,
    /// Default frame height.
    pub height: u32,
    /// Default pixel format.
    pub format: PixelFormat,
}

impl Default for VideoSpec {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1088,
            width: 720,
            height: 576,
            format: PixelFormat::Yuv420p,
        }
    }
}

impl VideoSpec {
    /// Spec whose default geometry is also its maximum.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            max_width: width,
            max_height: height,
            width,
            height,
            format,
        }
    }

    /// Raise the maximum dimensions.
    pub fn with_max(mut self, max_width: u32, max_height: u32) -> Self {
        self.max_width = max_width;
        self.max_height = max_height;
        self
    }

    /// Bytes each payload buffer is allocated with.
    pub fn capacity(&self) -> usize {
        (self.max_width as usize)
            .saturating_mul(self.max_height as usize)
            .saturating_mul(MAX_BYTES_PER_PIXEL)
    }

    /// Check the sizing record for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(Error::config(format!(
                "video maximum {}x{} must be non-zero",
                self.max_width, self.max_height
            )));
        }
        if self.width > self.max_width || self.height > self.max_height {
            return Err(Error::config(format!(
                "video geometry {}x{} exceeds maximum {}x{}",
                self.width, self.height, self.max_width, self.max_height
            )));
        }
        Ok(())
    }
}

/// A buffer for storing frame pixel data.
///
/// Holds two allocations of equal capacity: the live picture and a scratch
/// area used as the destination of in-place conversions.
#[derive(Clone)]
pub struct FrameBuffer {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
    data: Vec<u8>,
    scratch: Vec<u8>,
}

impl FrameBuffer {
    /// Allocate a buffer sized for the record's maximum dimensions.
    pub fn alloc(spec: &VideoSpec) -> Result<Self> {
        spec.validate()?;
        let capacity = spec.capacity();
        Ok(Self {
            width: spec.width,
            height: spec.height,
            format: spec.format,
            data: try_zeroed("video frame", capacity)?,
            scratch: try_zeroed("video scratch", capacity)?,
        })
    }

    /// Bytes available for a picture.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes used by the current picture.
    pub fn size(&self) -> usize {
        self.format.frame_size(self.width, self.height)
    }

    /// Change the working geometry without touching pixel data.
    pub fn set_geometry(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<()> {
        let needed = format.frame_size(width, height);
        if needed > self.capacity() {
            return Err(Error::BufferTooSmall {
                needed,
                available: self.capacity(),
            });
        }
        self.width = width;
        self.height = height;
        self.format = format;
        Ok(())
    }

    /// Get the picture bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.size()]
    }

    /// Get a mutable reference to the picture bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let size = self.size();
        &mut self.data[..size]
    }

    /// Byte offset of a plane within the picture.
    pub fn plane_offset(&self, plane: usize) -> usize {
        (0..plane)
            .map(|p| self.format.plane_size(p, self.width, self.height))
            .sum()
    }

    /// Get a plane's data.
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        if index >= self.format.num_planes() {
            return None;
        }
        let start = self.plane_offset(index);
        let len = self.format.plane_size(index, self.width, self.height);
        Some(&self.data[start..start + len])
    }

    /// Get a mutable reference to a plane's data.
    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        if index >= self.format.num_planes() {
            return None;
        }
        let start = self.plane_offset(index);
        let len = self.format.plane_size(index, self.width, self.height);
        Some(&mut self.data[start..start + len])
    }

    /// Fill the picture with a value.
    pub fn fill(&mut self, value: u8) {
        self.data_mut().fill(value);
    }

    /// Copy geometry and picture bytes from another frame buffer.
    pub fn copy_from(&mut self, other: &FrameBuffer) -> Result<()> {
        self.set_geometry(other.width, other.height, other.format)?;
        let size = other.size();
        self.data[..size].copy_from_slice(&other.data[..size]);
        Ok(())
    }

    /// Convert the picture to another pixel format in place.
    ///
    /// The converted picture is written to the scratch area, which then
    /// becomes the live buffer.
    pub fn convert_to(&mut self, target: PixelFormat) -> Result<()> {
        if target == self.format {
            return Ok(());
        }
        let (w, h) = (self.width as usize, self.height as usize);
        let needed = target.frame_size(self.width, self.height);
        if needed > self.scratch.len() {
            return Err(Error::BufferTooSmall {
                needed,
                available: self.scratch.len(),
            });
        }
        let src = &self.data[..self.size()];
        let dst = &mut self.scratch[..needed];
        match (self.format, target) {
            (PixelFormat::Rgb24, PixelFormat::Yuv420p) => rgb24_to_yuv420p(src, dst, w, h),
            (PixelFormat::Yuv420p, PixelFormat::Rgb24) => yuv420p_to_rgb24(src, dst, w, h),
            (PixelFormat::Rgb24, PixelFormat::Gray8) => {
                for (px, y) in src.chunks_exact(3).zip(dst.iter_mut()) {
                    *y = luma(px[0], px[1], px[2]);
                }
            }
            (PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p, PixelFormat::Gray8) => {
                dst.copy_from_slice(&src[..w * h]);
            }
            (from, to) => {
                return Err(Error::unsupported(format!(
                    "pixel conversion {from} -> {to}"
                )))
            }
        }
        std::mem::swap(&mut self.data, &mut self.scratch);
        self.format = target;
        Ok(())
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("capacity", &self.capacity())
            .finish()
    }
}

// BT.601 limited range, 8-bit fixed point.

fn luma(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8
}

fn chroma(r: i32, g: i32, b: i32) -> (u8, u8) {
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}

fn rgb24_to_yuv420p(src: &[u8], dst: &mut [u8], w: usize, h: usize) {
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let (y_plane, rest) = dst.split_at_mut(w * h);
    let (u_plane, v_plane) = rest.split_at_mut(cw * ch);

    for (px, y) in src.chunks_exact(3).zip(y_plane.iter_mut()) {
        *y = luma(px[0], px[1], px[2]);
    }

    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
            for y in (cy * 2)..(cy * 2 + 2).min(h) {
                for x in (cx * 2)..(cx * 2 + 2).min(w) {
                    let i = (y * w + x) * 3;
                    r += src[i] as i32;
                    g += src[i + 1] as i32;
                    b += src[i + 2] as i32;
                    n += 1;
                }
            }
            let (u, v) = chroma(r / n, g / n, b / n);
            u_plane[cy * cw + cx] = u;
            v_plane[cy * cw + cx] = v;
        }
    }
}

fn yuv420p_to_rgb24(src: &[u8], dst: &mut [u8], w: usize, h: usize) {
    let cw = w.div_ceil(2);
    let (y_plane, rest) = src.split_at(w * h);
    let (u_plane, v_plane) = rest.split_at(cw * h.div_ceil(2));

    for y in 0..h {
        for x in 0..w {
            let c = y_plane[y * w + x] as i32 - 16;
            let d = u_plane[(y / 2) * cw + x / 2] as i32 - 128;
            let e = v_plane[(y / 2) * cw + x / 2] as i32 - 128;
            let i = (y * w + x) * 3;
            dst[i] = ((298 * c + 409 * e + 128) >> 8).clamp(0, 255) as u8;
            dst[i + 1] = ((298 * c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255) as u8;
            dst[i + 2] = ((298 * c + 516 * d + 128) >> 8).clamp(0, 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_planes() {
        assert_eq!(PixelFormat::Yuv420p.num_planes(), 3);
        assert_eq!(PixelFormat::Rgb24.num_planes(), 1);
        assert_eq!(PixelFormat::Yuv420p.frame_size(4, 4), 16 + 4 + 4);
        assert_eq!(PixelFormat::Yuv420p.frame_size(3, 3), 9 + 4 + 4);
        assert_eq!(PixelFormat::Rgba.frame_size(2, 2), 16);
    }

    #[test]
    fn test_frame_buffer_creation() {
        let spec = VideoSpec::new(64, 48, PixelFormat::Yuv420p);
        let buffer = FrameBuffer::alloc(&spec).unwrap();
        assert_eq!(buffer.capacity(), 64 * 48 * MAX_BYTES_PER_PIXEL);
        assert_eq!(buffer.size(), 64 * 48 * 3 / 2);
        assert!(buffer.plane(0).is_some());
        assert!(buffer.plane(2).is_some());
        assert!(buffer.plane(3).is_none());
    }

    #[test]
    fn test_invalid_spec() {
        let spec = VideoSpec::new(0, 48, PixelFormat::Yuv420p);
        assert!(FrameBuffer::alloc(&spec).unwrap_err().is_config());

        let spec = VideoSpec {
            width: 128,
            ..VideoSpec::new(64, 48, PixelFormat::Rgb24)
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_geometry_change_within_capacity() {
        let spec = VideoSpec::new(32, 32, PixelFormat::Yuv420p).with_max(64, 64);
        let mut buffer = FrameBuffer::alloc(&spec).unwrap();
        buffer.set_geometry(64, 64, PixelFormat::Rgba).unwrap();
        assert_eq!(buffer.size(), buffer.capacity());

        let err = buffer.set_geometry(65, 64, PixelFormat::Rgba).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { .. }));
        assert_eq!(buffer.width, 64);

        let err = buffer.set_geometry(u32::MAX, u32::MAX, PixelFormat::Rgba).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { needed: usize::MAX, .. }));
        assert_eq!(buffer.size(), buffer.capacity());
    }

    #[test]
    fn test_copy_is_independent() {
        let spec = VideoSpec::new(8, 8, PixelFormat::Gray8);
        let mut src = FrameBuffer::alloc(&spec).unwrap();
        let mut dst = FrameBuffer::alloc(&spec).unwrap();
        src.fill(7);
        dst.copy_from(&src).unwrap();
        src.fill(9);
        assert!(dst.data().iter().all(|&b| b == 7));
    }

    #[test]
    fn test_rgb_yuv_rgb_is_close() {
        let spec = VideoSpec::new(4, 4, PixelFormat::Rgb24);
        let mut buffer = FrameBuffer::alloc(&spec).unwrap();
        for px in buffer.data_mut().chunks_exact_mut(3) {
            px.copy_from_slice(&[200, 100, 50]);
        }
        buffer.convert_to(PixelFormat::Yuv420p).unwrap();
        assert_eq!(buffer.format, PixelFormat::Yuv420p);
        assert_eq!(buffer.size(), 24);

        buffer.convert_to(PixelFormat::Rgb24).unwrap();
        for px in buffer.data().chunks_exact(3) {
            assert!((px[0] as i32 - 200).abs() <= 3, "{px:?}");
            assert!((px[1] as i32 - 100).abs() <= 3, "{px:?}");
            assert!((px[2] as i32 - 50).abs() <= 3, "{px:?}");
        }
    }

    #[test]
    fn test_gray_conversion() {
        let spec = VideoSpec::new(2, 2, PixelFormat::Rgb24);
        let mut buffer = FrameBuffer::alloc(&spec).unwrap();
        buffer.fill(255);
        buffer.convert_to(PixelFormat::Gray8).unwrap();
        assert_eq!(buffer.data(), &[235, 235, 235, 235]);
    }

    #[test]
    fn test_unsupported_conversion() {
        let spec = VideoSpec::new(2, 2, PixelFormat::Rgba);
        let mut buffer = FrameBuffer::alloc(&spec).unwrap();
        assert!(buffer.convert_to(PixelFormat::Yuv422p).is_err());
        assert_eq!(buffer.format, PixelFormat::Rgba);
    }
}
