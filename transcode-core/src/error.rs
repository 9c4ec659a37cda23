//! Error types shared by the frame buffer crates.

use thiserror::Error;

/// Main error type for payload and spec handling.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unsupported feature or format.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Resource exhausted (memory, buffers, etc.).
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// End of stream reached.
    #[error("End of stream")]
    EndOfStream,

    /// Buffer too small for operation.
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Build the error reported when a buffer of `bytes` cannot be reserved.
    pub fn alloc_failed(what: &str, bytes: usize) -> Self {
        Error::ResourceExhausted(format!("cannot allocate {bytes} bytes for {what}"))
    }

    /// Check if this is an end-of-stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// Check if this error comes from bad parameters rather than the runtime.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::InvalidParameter(_) | Error::Unsupported(_)
        )
    }

    /// Check if this error is an allocation or capacity failure.
    #[must_use]
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            Error::ResourceExhausted(_) | Error::BufferTooSmall { .. }
        )
    }
}

/// Allocate a zeroed byte vector, reporting failure instead of aborting.
pub(crate) fn try_zeroed(what: &str, bytes: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|_| Error::alloc_failed(what, bytes))?;
    data.resize(bytes, 0);
    Ok(data)
}
