//! Unified error handling for the fencetrack library.
//!
//! Malformed samples are not errors: the normalizer returns `None` and the
//! sample is dropped. This type covers the conditions a caller must be told
//! about (no data, invalid operator input, transport unavailable).

use thiserror::Error;

/// Unified error type for fencetrack operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    /// The operation needs a non-empty history
    #[error("No track data available for {operation}")]
    NoData { operation: String },

    /// A fence polygon was rejected
    #[error("Fence has {vertices} vertices, minimum 3 required")]
    InvalidFence { vertices: usize },

    /// Playback speed outside the configured set
    #[error("Playback speed {multiplier}x is not one of the configured steps")]
    UnsupportedSpeed { multiplier: f64 },

    /// History filter bounds are inconsistent
    #[error("Invalid history filter: {message}")]
    InvalidFilter { message: String },

    /// Blank command text
    #[error("Command text is empty")]
    EmptyCommand,

    /// Message transport is not connected
    #[error("Message transport is not connected")]
    TransportUnavailable,

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl TrackError {
    pub fn no_data(operation: &str) -> Self {
        TrackError::NoData {
            operation: operation.to_string(),
        }
    }
}

/// Result type alias for fencetrack operations.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Extension trait for converting Option to TrackError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a no-data error.
    fn ok_or_no_data(self, operation: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_no_data(self, operation: &str) -> Result<T> {
        self.ok_or_else(|| TrackError::no_data(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackError::InvalidFence { vertices: 2 };
        assert!(err.to_string().contains("2 vertices"));

        let err = TrackError::no_data("playback");
        assert_eq!(err.to_string(), "No track data available for playback");
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_no_data("export"),
            Err(TrackError::NoData { .. })
        ));
        assert_eq!(Some(3).ok_or_no_data("export"), Ok(3));
    }
}
