//! Error types for the environment abstraction layer.

use thiserror::Error;

/// Errors that can occur while sourcing or converting frames.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The frame source could not produce a frame (not EOF - an actual fault).
    #[error("capture error: {0}")]
    Capture(String),

    /// A requested pixel format has no conversion path from the source format.
    #[error("unsupported color conversion: {0}")]
    UnsupportedConversion(String),

    /// The view was asked for a region outside the frame bounds.
    #[error("region out of bounds: {0}")]
    OutOfBounds(String),
}

impl EnvError {
    /// Creates a capture error.
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }
}
