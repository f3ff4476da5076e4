//! Error types shared by the recording core.

use thiserror::Error;

/// Errors raised by adapters, chat clients and the capture supervisor.
///
/// Only [`RecorderError::Launch`] is meant to cross up to process level;
/// everything else is absorbed by the retry loops that produced it.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response shape: {0}")]
    ProtocolShape(String),

    #[error("Failed to launch capture tool: {0}")]
    Launch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported room url: {0}")]
    UnsupportedRoom(String),
}

impl RecorderError {
    /// Whether a retry loop should swallow this error and try again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RecorderError::Network(_) | RecorderError::ProtocolShape(_) | RecorderError::Io(_)
        )
    }
}

impl From<reqwest::Error> for RecorderError {
    fn from(err: reqwest::Error) -> Self {
        RecorderError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(err: serde_json::Error) -> Self {
        RecorderError::ProtocolShape(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RecorderError {
    fn from(err: tokio::task::JoinError) -> Self {
        RecorderError::Io(std::io::Error::other(err))
    }
}

/// Result alias for the recording core.
pub type RecorderResult<T> = Result<T, RecorderError>;
