//! Frame buffer error types.

use thiserror::Error;
use transcode_core::error::Error as CoreError;

/// Stream a ring or worker pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    /// Lowercase name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame buffer error type.
#[derive(Error, Debug)]
pub enum FrameBufferError {
    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Slot allocation failed while building a ring.
    #[error("Resource exhausted: {stream} ring stopped at slot {allocated} of {requested}: {reason}")]
    ResourceExhausted {
        stream: StreamKind,
        allocated: usize,
        requested: usize,
        reason: String,
    },

    /// No slot was free to duplicate a frame into.
    #[error("No free {stream} slot to clone frame {id}")]
    CloneUnavailable { stream: StreamKind, id: u64 },

    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

impl FrameBufferError {
    /// Bad parameters, as opposed to runtime exhaustion.
    #[must_use]
    pub fn is_config(&self) -> bool {
        match self {
            Self::InvalidConfig(_) => true,
            Self::Core(e) => e.is_config(),
            _ => false,
        }
    }

    /// Allocation or capacity failure.
    #[must_use]
    pub fn is_resource(&self) -> bool {
        match self {
            Self::ResourceExhausted { .. } | Self::CloneUnavailable { .. } => true,
            Self::Core(e) => e.is_resource(),
            _ => false,
        }
    }
}

/// Frame buffer result type.
pub type Result<T> = std::result::Result<T, FrameBufferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_vs_resource() {
        let err = FrameBufferError::InvalidConfig("ring size".into());
        assert!(err.is_config());
        assert!(!err.is_resource());

        let err: FrameBufferError = CoreError::config("bad spec").into();
        assert!(err.is_config());

        let err = FrameBufferError::ResourceExhausted {
            stream: StreamKind::Video,
            allocated: 3,
            requested: 8,
            reason: "out of memory".into(),
        };
        assert!(err.is_resource());
        assert_eq!(
            err.to_string(),
            "Resource exhausted: video ring stopped at slot 3 of 8: out of memory"
        );

        let err = FrameBufferError::CloneUnavailable {
            stream: StreamKind::Audio,
            id: 7,
        };
        assert!(err.is_resource());
        assert!(!err.is_config());
        assert_eq!(err.to_string(), "No free audio slot to clone frame 7");
    }
}
