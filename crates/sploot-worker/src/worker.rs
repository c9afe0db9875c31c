//! Single-item embedding worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sploot_models::{EmbeddingRecord, QueueItem};
use tracing::Instrument;

use crate::error::EmbedError;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{RetryDecision, RetryPolicy, TerminalReason};
use crate::service::{EmbeddingService, EmbeddingStore};

/// Result of one attempt, consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// Embedding generated and persisted
    Completed(EmbeddingRecord),
    /// Attempt failed; re-admit after `delay`
    Retry { delay: Duration, error: EmbedError },
    /// Attempt failed for good
    Failed {
        reason: TerminalReason,
        error: EmbedError,
    },
}

impl WorkerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerOutcome::Completed(_) => "completed",
            WorkerOutcome::Retry { .. } => "retry",
            WorkerOutcome::Failed { .. } => "failed",
        }
    }
}

/// Runs one embedding job against the collaborators.
///
/// Never fails past its own boundary: every attempt ends in a
/// [`WorkerOutcome`]. The worker does not mutate the item; applying the
/// outcome is the dispatcher's job.
pub struct EmbeddingWorker {
    service: Arc<dyn EmbeddingService>,
    store: Arc<dyn EmbeddingStore>,
    policy: RetryPolicy,
    job_timeout: Option<Duration>,
}

impl EmbeddingWorker {
    pub fn new(
        service: Arc<dyn EmbeddingService>,
        store: Arc<dyn EmbeddingStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            store,
            policy,
            job_timeout: None,
        }
    }

    /// Bound each provider call.
    pub fn with_job_timeout(mut self, job_timeout: Option<Duration>) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run(&self, item: &QueueItem) -> WorkerOutcome {
        let logger = JobLogger::new(item, "embed_image");
        let span = logger.create_span();
        let started = Instant::now();

        logger.log_start(&item.blob_url);
        let outcome = match self.attempt(item).instrument(span).await {
            Ok(record) => {
                logger.log_completion(&format!(
                    "{} ({} dims)",
                    record.model, record.dimension
                ));
                WorkerOutcome::Completed(record)
            }
            Err(error) => self.outcome_for_error(item, error),
        };

        metrics::record_attempt_duration(outcome.as_str(), started.elapsed().as_secs_f64());
        outcome
    }

    /// Classify a failed attempt at `item`.
    pub fn outcome_for_error(&self, item: &QueueItem, error: EmbedError) -> WorkerOutcome {
        let logger = JobLogger::new(item, "embed_image");

        match self.policy.classify(&error, item) {
            RetryDecision::Retry { delay } => {
                logger.log_warning(&format!("{} (retrying in {:?})", error, delay));
                WorkerOutcome::Retry { delay, error }
            }
            RetryDecision::Terminal(reason) => {
                logger.log_error(&format!("{} ({})", error, reason.as_str()));
                WorkerOutcome::Failed { reason, error }
            }
        }
    }

    async fn attempt(&self, item: &QueueItem) -> Result<EmbeddingRecord, EmbedError> {
        let embed = self.service.embed_image(&item.blob_url, &item.checksum);
        let result = match self.job_timeout {
            Some(limit) => tokio::time::timeout(limit, embed)
                .await
                .map_err(|_| EmbedError::Timeout(limit))??,
            None => embed.await?,
        };

        match self.store.upsert_embedding(&item.asset_id, &result).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(EmbedError::persist_failed("store returned no record")),
            Err(e) => Err(EmbedError::persist_failed(e.to_string())),
        }
    }
}
