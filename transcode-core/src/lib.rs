//! # Transcode Core
//!
//! Payload types shared by the frame ring and its collaborators.
//!
//! This crate provides:
//! - Error handling types
//! - Capacity-sized video and audio buffers with in-place format conversion
//! - The sizing specs every ring slot is allocated from

pub mod error;
pub mod frame;
pub mod sample;
pub mod specs;

pub use error::{Error, Result};
pub use frame::{FrameBuffer, PixelFormat, VideoSpec};
pub use sample::{SampleBuffer, SampleFormat, AudioSpec};
pub use specs::FrameSpecs;
