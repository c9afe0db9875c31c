//! Queue lifecycle events.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::QueueItem;

/// Lifecycle transition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    /// Item admitted to the pending set
    Queued,
    /// Item handed to a worker
    Processing,
    /// Embedding generated and persisted
    Completed,
    /// Terminal failure, item removed
    Failed,
    /// Attempt failed, item will be re-admitted after a delay
    Retry,
}

impl QueueEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEventType::Queued => "queued",
            QueueEventType::Processing => "processing",
            QueueEventType::Completed => "completed",
            QueueEventType::Failed => "failed",
            QueueEventType::Retry => "retry",
        }
    }

    /// Check if this event ends the item's life in the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueEventType::Completed | QueueEventType::Failed)
    }
}

/// Notification emitted once per state transition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueEvent {
    #[serde(rename = "type")]
    pub kind: QueueEventType,

    /// Item state after the transition
    pub item: QueueItem,

    /// Error message for `failed` and `retry` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl QueueEvent {
    fn new(kind: QueueEventType, item: QueueItem, error: Option<String>) -> Self {
        Self {
            kind,
            item,
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn queued(item: QueueItem) -> Self {
        Self::new(QueueEventType::Queued, item, None)
    }

    pub fn processing(item: QueueItem) -> Self {
        Self::new(QueueEventType::Processing, item, None)
    }

    pub fn completed(item: QueueItem) -> Self {
        Self::new(QueueEventType::Completed, item, None)
    }

    pub fn failed(item: QueueItem, error: impl Into<String>) -> Self {
        Self::new(QueueEventType::Failed, item, Some(error.into()))
    }

    pub fn retry(item: QueueItem, error: impl Into<String>) -> Self {
        Self::new(QueueEventType::Retry, item, Some(error.into()))
    }

    /// Asset the event refers to.
    pub fn asset_id(&self) -> &str {
        self.item.asset_id.as_str()
    }
}
