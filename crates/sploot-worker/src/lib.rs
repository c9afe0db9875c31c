//! Background embedding pipeline.
//!
//! This crate provides:
//! - Collaborator contracts for the embedding provider and embedding store
//! - Retry classification with exponential backoff
//! - The per-item worker
//! - The dispatcher enforcing the concurrency bound and ordering rule
//! - Structured job logging and queue metrics

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod retry;
pub mod service;
pub mod worker;

pub use config::QueueConfig;
pub use error::{EmbedError, WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use manager::EmbeddingQueueManager;
pub use retry::{RetryDecision, RetryPolicy, TerminalReason};
pub use service::{EmbeddingService, EmbeddingStore, MemoryEmbeddingStore};
pub use worker::{EmbeddingWorker, WorkerOutcome};
