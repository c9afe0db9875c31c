//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for embedding attempts with
//! tracing spans and contextual information.

use sploot_models::QueueItem;
use tracing::{error, info, warn, Span};

/// Per-attempt logger carrying the asset and operation context.
///
/// Every line it emits has `asset_id`, `operation` and a 1-based `attempt`
/// field so retries of one asset can be followed in the logs.
#[derive(Debug, Clone)]
pub struct JobLogger {
    asset_id: String,
    operation: String,
    attempt: u32,
}

impl JobLogger {
    /// Create a logger for one attempt at `item`.
    ///
    /// # Arguments
    /// * `item` - The queued item being attempted; its retry count sets the attempt number
    /// * `operation` - The kind of work (e.g., "embed_image", "readmit")
    pub fn new(item: &QueueItem, operation: &str) -> Self {
        Self {
            asset_id: item.asset_id.to_string(),
            operation: operation.to_string(),
            attempt: item.retry_count + 1,
        }
    }

    /// Log the start of an attempt.
    pub fn log_start(&self, message: &str) {
        info!(
            asset_id = %self.asset_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    /// Log a recoverable problem, such as a failure that will be retried.
    pub fn log_warning(&self, message: &str) {
        warn!(
            asset_id = %self.asset_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    /// Log a failure that ends the item's life in the queue.
    pub fn log_error(&self, message: &str) {
        error!(
            asset_id = %self.asset_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    /// Log a successful attempt.
    pub fn log_completion(&self, message: &str) {
        info!(
            asset_id = %self.asset_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    /// Get the asset ID.
    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    /// Get the operation type.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Get the attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Create a tracing span for this attempt.
    ///
    /// Enter it around the provider call so nested logs inherit the context.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "embedding_job",
            asset_id = %self.asset_id,
            operation = %self.operation,
            attempt = self.attempt
        )
    }
}
