//! Worker error types.

use std::time::Duration;

use sploot_models::ErrorType;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failure reported by the embedding collaborators.
///
/// The variant is the classification; the retry policy never inspects
/// the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbedError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Provider hint for the earliest sensible retry
        retry_after: Option<Duration>,
    },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Embedding timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to persist embedding: {0}")]
    PersistFailed(String),

    #[error("Embedding failed: {0}")]
    Other(String),
}

impl EmbedError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: msg.into(),
            retry_after,
        }
    }

    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImage(msg.into())
    }

    pub fn persist_failed(msg: impl Into<String>) -> Self {
        Self::PersistFailed(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classification recorded on the queue item.
    pub fn error_type(&self) -> ErrorType {
        match self {
            EmbedError::Network(_) | EmbedError::Timeout(_) => ErrorType::Network,
            EmbedError::RateLimited { .. } => ErrorType::RateLimit,
            EmbedError::InvalidImage(_) => ErrorType::InvalidImage,
            EmbedError::PersistFailed(_) | EmbedError::Other(_) => ErrorType::Unknown,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EmbedError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors raised by the queue manager itself.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] sploot_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
