//! Status and persistence snapshots.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::QueueItem;

/// Read-only view of queue occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueueStatus {
    /// Items waiting for a worker (including those sitting out a retry delay)
    pub queued: usize,
    /// Items currently held by a worker
    pub processing: usize,
}

impl QueueStatus {
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.processing == 0
    }
}

/// Durable representation of the pending set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueueSnapshot {
    pub queue: Vec<QueueItem>,

    /// When the snapshot was taken
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[schemars(with = "i64")]
    pub timestamp: DateTime<Utc>,
}

impl QueueSnapshot {
    /// Snapshot the given items at the current time.
    pub fn new(queue: Vec<QueueItem>) -> Self {
        Self {
            queue,
            timestamp: Utc::now(),
        }
    }

    /// Age of the snapshot relative to `now`. Never negative.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).max(Duration::zero())
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
