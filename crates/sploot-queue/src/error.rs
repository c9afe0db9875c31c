//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Storage failed: {0}")]
    StorageFailed(String),

    #[error("Snapshot is corrupt: {0}")]
    CorruptSnapshot(String),

    #[error("Persister is closed")]
    PersisterClosed,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    pub fn storage_failed(msg: impl Into<String>) -> Self {
        Self::StorageFailed(msg.into())
    }

    pub fn corrupt_snapshot(msg: impl Into<String>) -> Self {
        Self::CorruptSnapshot(msg.into())
    }
}
