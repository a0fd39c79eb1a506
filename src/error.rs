//! Error types for the event relay.

use thiserror::Error;

/// Main error type for relay operations.
#[derive(Debug, Error)]
pub enum EventsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote log is not connected")]
    NotConnected,

    #[error("Unable to reach remote log after {attempts} attempts")]
    Connectivity { attempts: u32 },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Cursor resolution failed: {0}")]
    CursorResolution(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Delta feed is closed")]
    FeedClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Log directory is locked by another process")]
    Locked,

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),
}

impl EventsError {
    /// Returns true if the failure is a connectivity problem worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventsError::NotConnected)
    }
}

impl From<serde_json::Error> for EventsError {
    fn from(e: serde_json::Error) -> Self {
        EventsError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for EventsError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        EventsError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EventsError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        EventsError::Deserialization(e.to_string())
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, EventsError>;
