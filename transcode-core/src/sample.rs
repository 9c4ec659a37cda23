//! Audio sample buffer abstractions.
//!
//! Like video, an audio slot is sized once for the largest chunk the stream
//! may produce and reused afterwards. Samples are always interleaved.

use crate::error::{try_zeroed, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Widest supported sample, in bytes.
pub const MAX_BYTES_PER_SAMPLE: usize = 4;

/// Sample format for audio data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Unsigned 8-bit.
    U8,
    /// Signed 16-bit, native endian.
    #[default]
    S16,
    /// Signed 32-bit, native endian.
    S32,
    /// 32-bit float.
    F32,
}

impl SampleFormat {
    /// Get the number of bytes per sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S32 | Self::F32 => 4,
        }
    }

    /// Check if this is a floating-point format.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32)
    }

    fn read(&self, bytes: &[u8]) -> f32 {
        match self {
            Self::U8 => (bytes[0] as f32 - 128.0) / 128.0,
            Self::S16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
            Self::S32 => {
                i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0
            }
            Self::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    fn write(&self, value: f32, out: &mut [u8]) {
        let value = value.clamp(-1.0, 1.0);
        match self {
            Self::U8 => out[0] = (value * 127.0 + 128.0).round() as u8,
            Self::S16 => out.copy_from_slice(&((value * 32767.0).round() as i16).to_ne_bytes()),
            Self::S32 => {
                out.copy_from_slice(&((value as f64 * 2_147_483_647.0).round() as i32).to_ne_bytes())
            }
            Self::F32 => out.copy_from_slice(&value.to_ne_bytes()),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8 => write!(f, "u8"),
            Self::S16 => write!(f, "s16"),
            Self::S32 => write!(f, "s32"),
            Self::F32 => write!(f, "flt"),
        }
    }
}

/// Sizing record for an audio stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSpec {
    /// Largest number of samples per channel in one chunk.
    pub max_samples: usize,
    /// Channel count.
    pub channels: u32,
    /// Default sample format.
    pub format: SampleFormat,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            max_samples: 48_000,
            channels: 2,
            format: SampleFormat::S16,
            sample_rate: 48_000,
        }
    }
}

impl AudioSpec {
    /// Create a spec.
    pub fn new(max_samples: usize, channels: u32, format: SampleFormat, sample_rate: u32) -> Self {
        Self {
            max_samples,
            channels,
            format,
            sample_rate,
        }
    }

    /// Bytes each payload buffer is allocated with.
    pub fn capacity(&self) -> usize {
        self.max_samples
            .saturating_mul(self.channels as usize)
            .saturating_mul(MAX_BYTES_PER_SAMPLE)
    }

    /// Check the sizing record for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.max_samples == 0 || self.channels == 0 {
            return Err(Error::config(format!(
                "audio chunk of {} samples x {} channels is empty",
                self.max_samples, self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(Error::config("audio sample rate must be non-zero"));
        }
        Ok(())
    }
}

/// Buffer for storing interleaved audio sample data.
#[derive(Clone)]
pub struct SampleBuffer {
    /// Number of samples per channel.
    pub num_samples: usize,
    /// Channel count.
    pub channels: u32,
    /// Sample format.
    pub format: SampleFormat,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    data: Vec<u8>,
    scratch: Vec<u8>,
}

impl SampleBuffer {
    /// Allocate a buffer sized for the record's largest chunk.
    ///
    /// The working length starts at zero samples.
    pub fn alloc(spec: &AudioSpec) -> Result<Self> {
        spec.validate()?;
        let capacity = spec.capacity();
        Ok(Self {
            num_samples: 0,
            channels: spec.channels,
            format: spec.format,
            sample_rate: spec.sample_rate,
            data: try_zeroed("audio chunk", capacity)?,
            scratch: try_zeroed("audio scratch", capacity)?,
        })
    }

    /// Bytes available for samples.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Get the total size in bytes.
    pub fn size(&self) -> usize {
        self.num_samples * self.channels as usize * self.format.bytes_per_sample()
    }

    /// Change the working layout without touching sample data.
    pub fn set_layout(&mut self, num_samples: usize, channels: u32, format: SampleFormat) -> Result<()> {
        let needed = num_samples
            .saturating_mul(channels as usize)
            .saturating_mul(format.bytes_per_sample());
        if needed > self.capacity() {
            return Err(Error::BufferTooSmall {
                needed,
                available: self.capacity(),
            });
        }
        self.num_samples = num_samples;
        self.channels = channels;
        self.format = format;
        Ok(())
    }

    /// Get interleaved data.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.size()]
    }

    /// Get mutable interleaved data.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let size = self.size();
        &mut self.data[..size]
    }

    fn sample_range(&self, index: usize) -> Option<std::ops::Range<usize>> {
        let bps = self.format.bytes_per_sample();
        let start = index.checked_mul(bps)?;
        Some(start..start.checked_add(bps)?)
    }

    /// Read one sample as a normalized float.
    pub fn sample(&self, index: usize) -> Option<f32> {
        let range = self.sample_range(index)?;
        self.data().get(range).map(|bytes| self.format.read(bytes))
    }

    /// Write one sample from a normalized float.
    pub fn set_sample(&mut self, index: usize, value: f32) -> bool {
        let format = self.format;
        let Some(range) = self.sample_range(index) else {
            return false;
        };
        match self.data_mut().get_mut(range) {
            Some(out) => {
                format.write(value, out);
                true
            }
            None => false,
        }
    }

    /// Fill all channels with silence.
    pub fn silence(&mut self) {
        let silence_value = match self.format {
            SampleFormat::U8 => 128,
            _ => 0,
        };
        self.data_mut().fill(silence_value);
    }

    /// Copy layout and sample bytes from another buffer.
    pub fn copy_from(&mut self, other: &SampleBuffer) -> Result<()> {
        self.set_layout(other.num_samples, other.channels, other.format)?;
        self.sample_rate = other.sample_rate;
        let size = other.size();
        self.data[..size].copy_from_slice(&other.data[..size]);
        Ok(())
    }

    /// Convert the samples to another format in place.
    pub fn convert_to(&mut self, target: SampleFormat) -> Result<()> {
        if target == self.format {
            return Ok(());
        }
        let count = self.num_samples * self.channels as usize;
        let (src_bps, dst_bps) = (self.format.bytes_per_sample(), target.bytes_per_sample());
        let needed = count * dst_bps;
        if needed > self.scratch.len() {
            return Err(Error::BufferTooSmall {
                needed,
                available: self.scratch.len(),
            });
        }
        let from = self.format;
        for (src, dst) in self.data[..count * src_bps]
            .chunks_exact(src_bps)
            .zip(self.scratch[..needed].chunks_exact_mut(dst_bps))
        {
            target.write(from.read(src), dst);
        }
        std::mem::swap(&mut self.data, &mut self.scratch);
        self.format = target;
        Ok(())
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("num_samples", &self.num_samples)
            .field("channels", &self.channels)
            .field("format", &self.format)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}
