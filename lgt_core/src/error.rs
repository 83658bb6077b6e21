//! Error types for the tracking engine.

use thiserror::Error;

/// Errors the tracker's public API can return. Numeric and bounds faults are
/// *not* represented here - they're recovered locally inside the failing
/// stage and only surface as a `tracing::warn!` event, per the propagation
/// policy: configuration and input errors abort at the boundary, everything
/// else is contained.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Unknown tracker name, unknown modality name, unknown patch variant,
    /// or a missing required configuration key.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `initialize` called with an empty image or a degenerate region
    /// (width or height < 1).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TrackerError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
