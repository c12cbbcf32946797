//! Error types for the event link.

use thiserror::Error;

/// Main error type for event link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Not connected to the event service")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Subscription to '{event_type}' was not authorized")]
    Unauthorized { event_type: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Event client has shut down")]
    Closed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for LinkError {
    fn from(e: url::ParseError) -> Self {
        LinkError::InvalidConfig(e.to_string())
    }
}

/// Result type for event link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
