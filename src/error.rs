use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Session-scoped failures. None of these are fatal to the process; a session
/// that hits one moves to `SessionState::Error` and can be reset.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanError {
    #[error("Camera access was denied")]
    PermissionDenied,

    #[error("No camera devices found")]
    NoDeviceFound,

    #[error("Recognition failed: {details}")]
    RecognitionFailed { details: String },

    #[error("Network error: {details}")]
    NetworkError { details: String },

    #[error("Another decode or recognition operation is already in progress")]
    OperationInProgress,

    #[error("Invalid state: {details}")]
    InvalidState { details: String },

    #[error("Operation timed out after {after:?}")]
    Timeout { after: Duration },
}

impl ScanError {
    pub fn recognition_failed<S: Into<String>>(details: S) -> Self {
        Self::RecognitionFailed {
            details: details.into(),
        }
    }

    pub fn network<S: Into<String>>(details: S) -> Self {
        Self::NetworkError {
            details: details.into(),
        }
    }

    pub fn invalid_state<S: Into<String>>(details: S) -> Self {
        Self::InvalidState {
            details: details.into(),
        }
    }

    /// Short machine-friendly name, used in events and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::PermissionDenied => "permission_denied",
            ScanError::NoDeviceFound => "no_device_found",
            ScanError::RecognitionFailed { .. } => "recognition_failed",
            ScanError::NetworkError { .. } => "network_error",
            ScanError::OperationInProgress => "operation_in_progress",
            ScanError::InvalidState { .. } => "invalid_state",
            ScanError::Timeout { .. } => "timeout",
        }
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(e: reqwest::Error) -> Self {
        ScanError::network(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum CamscanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },
}

impl CamscanError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CamscanError>;

/// Result alias for session-scoped operations
pub type ScanResult<T> = std::result::Result<T, ScanError>;
