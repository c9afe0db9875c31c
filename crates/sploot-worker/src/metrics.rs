//! Queue metrics.
//!
//! Recording is a no-op until the host process installs a `metrics`
//! recorder (e.g. a Prometheus exporter).

use metrics::{counter, gauge, histogram};
use sploot_models::{ErrorType, Priority, QueueStatus};

/// Metric names as constants for consistency.
pub mod names {
    pub const ITEMS_ENQUEUED_TOTAL: &str = "sploot_embedding_items_enqueued_total";
    pub const ITEMS_DEDUPLICATED_TOTAL: &str = "sploot_embedding_items_deduplicated_total";
    pub const ITEMS_COMPLETED_TOTAL: &str = "sploot_embedding_items_completed_total";
    pub const ITEMS_RETRIED_TOTAL: &str = "sploot_embedding_items_retried_total";
    pub const ITEMS_FAILED_TOTAL: &str = "sploot_embedding_items_failed_total";
    pub const QUEUE_PENDING: &str = "sploot_embedding_queue_pending";
    pub const QUEUE_PROCESSING: &str = "sploot_embedding_queue_processing";
    pub const ATTEMPT_DURATION_SECONDS: &str = "sploot_embedding_attempt_duration_seconds";
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "high",
        Priority::Normal => "normal",
    }
}

pub fn record_enqueued(priority: Priority) {
    let labels = [("priority", priority_label(priority).to_string())];
    counter!(names::ITEMS_ENQUEUED_TOTAL, &labels).increment(1);
}

pub fn record_deduplicated() {
    counter!(names::ITEMS_DEDUPLICATED_TOTAL).increment(1);
}

pub fn record_completed() {
    counter!(names::ITEMS_COMPLETED_TOTAL).increment(1);
}

pub fn record_retry(error_type: ErrorType) {
    let labels = [("error_type", error_type.as_str().to_string())];
    counter!(names::ITEMS_RETRIED_TOTAL, &labels).increment(1);
}

pub fn record_failed(error_type: ErrorType) {
    let labels = [("error_type", error_type.as_str().to_string())];
    counter!(names::ITEMS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_attempt_duration(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    histogram!(names::ATTEMPT_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn set_queue_depth(status: QueueStatus) {
    gauge!(names::QUEUE_PENDING).set(status.queued as f64);
    gauge!(names::QUEUE_PROCESSING).set(status.processing as f64);
}
