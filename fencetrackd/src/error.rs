//! Error type for the daemon's I/O edges.

use fencetrack::TrackError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    /// Rejected by the tracking core
    #[error(transparent)]
    Track(#[from] TrackError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A remote service answered, but not with what we asked for
    #[error("Unexpected response from {service}: {message}")]
    BadResponse {
        service: &'static str,
        message: String,
    },

    /// Operator input that could not be parsed
    #[error("{0}")]
    Usage(String),

    #[error("No history source configured")]
    NoHistorySource,
}

impl DaemonError {
    pub fn usage(message: impl Into<String>) -> Self {
        DaemonError::Usage(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
