//! Queue item definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of an uploaded asset. Unique key within the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AssetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Dispatch priority. Serialized as `0` (high) or `1` (normal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    /// User-visible work, dispatched ahead of normal items still pending
    High,
    /// Background work
    #[default]
    Normal,
}

impl Priority {
    pub fn as_u8(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.as_u8()
    }
}

/// Priority value outside the `0`/`1` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid priority {0}, expected 0 or 1")]
pub struct InvalidPriority(pub u8);

impl TryFrom<u8> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::High),
            1 => Ok(Priority::Normal),
            other => Err(InvalidPriority(other)),
        }
    }
}

/// Classified kind of the last failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Transient transport failure
    Network,
    /// Provider throttled the request
    RateLimit,
    /// The asset cannot be embedded; never retried
    InvalidImage,
    /// Anything else, including failure to persist the embedding
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Network => "network",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::InvalidImage => "invalid_image",
            ErrorType::Unknown => "unknown",
        }
    }

    /// Whether a failure of this kind may be retried at all.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorType::InvalidImage)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One pending or in-flight embedding job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Asset being embedded (dedup key)
    pub asset_id: AssetId,

    /// Location of the uploaded blob
    pub blob_url: String,

    /// Content checksum of the blob
    pub checksum: String,

    /// Dispatch priority
    #[schemars(with = "u8")]
    pub priority: Priority,

    /// Number of failed attempts so far
    #[serde(default)]
    pub retry_count: u32,

    /// When the item entered the queue
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[schemars(with = "i64")]
    pub added_at: DateTime<Utc>,

    /// Classification of the last failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,

    /// Terminal failure flag
    #[serde(default)]
    pub permanently_failed: bool,

    /// Raised the retry budget for user-initiated uploads
    #[serde(default)]
    pub is_user_triggered: bool,
}

impl QueueItem {
    /// Create a new normal-priority background item.
    pub fn new(
        asset_id: impl Into<AssetId>,
        blob_url: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            blob_url: blob_url.into(),
            checksum: checksum.into(),
            priority: Priority::Normal,
            retry_count: 0,
            added_at: Utc::now(),
            error_type: None,
            permanently_failed: false,
            is_user_triggered: false,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Mark as user triggered.
    pub fn user_triggered(mut self, user_triggered: bool) -> Self {
        self.is_user_triggered = user_triggered;
        self
    }

    /// Override the enqueue timestamp.
    pub fn with_added_at(mut self, added_at: DateTime<Utc>) -> Self {
        self.added_at = added_at;
        self
    }

    pub fn is_high_priority(&self) -> bool {
        self.priority == Priority::High
    }

    /// Record a retryable failure and bump the attempt counter.
    pub fn record_retry(&mut self, error_type: ErrorType) {
        self.error_type = Some(error_type);
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Record a terminal failure. `retry_count` is left untouched.
    pub fn mark_failed(&mut self, error_type: ErrorType, permanent: bool) {
        self.error_type = Some(error_type);
        if permanent {
            self.permanently_failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_item_serializes_camel_case() {
        let added_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let item = QueueItem::new("asset-1", "https://blob/1.png", "abc")
            .with_priority(Priority::High)
            .user_triggered(true)
            .with_added_at(added_at);

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["assetId"], "asset-1");
        assert_eq!(json["blobUrl"], "https://blob/1.png");
        assert_eq!(json["priority"], 0);
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["addedAt"], 1_700_000_000_123i64);
        assert_eq!(json["isUserTriggered"], true);
        assert!(json.get("errorType").is_none());
    }

    #[test]
    fn test_item_deserializes_with_defaults() {
        let json = r#"{
            "assetId": "a",
            "blobUrl": "u",
            "checksum": "c",
            "priority": 1,
            "addedAt": 1700000000000,
            "errorType": "rate_limit"
        }"#;
        let item: QueueItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.priority, Priority::Normal);
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.error_type, Some(ErrorType::RateLimit));
        assert!(!item.permanently_failed);
        assert!(!item.is_user_triggered);
    }

    #[test]
    fn test_invalid_priority_rejected() {
        let json = r#"{"assetId":"a","blobUrl":"u","checksum":"c","priority":7,"addedAt":0}"#;
        assert!(serde_json::from_str::<QueueItem>(json).is_err());
        assert_eq!(Priority::try_from(7), Err(InvalidPriority(7)));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High < Priority::Normal);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_failure_bookkeeping() {
        let mut item = QueueItem::new("a", "u", "c");
        item.record_retry(ErrorType::Network);
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.error_type, Some(ErrorType::Network));

        item.mark_failed(ErrorType::InvalidImage, true);
        assert_eq!(item.retry_count, 1);
        assert!(item.permanently_failed);
        assert!(!ErrorType::InvalidImage.is_retryable());
    }
}
