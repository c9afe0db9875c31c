//! Shared data models for the Sploot embedding queue.
//!
//! This crate provides Serde-serializable types for:
//! - Queue items and their priority/failure state
//! - Lifecycle events published by the dispatcher
//! - Status and persistence snapshots
//! - Embedding results returned by the embedding provider

pub mod embedding;
pub mod event;
pub mod item;
pub mod status;

// Re-export common types
pub use embedding::{EmbeddingRecord, EmbeddingResult};
pub use event::{QueueEvent, QueueEventType};
pub use item::{AssetId, ErrorType, InvalidPriority, Priority, QueueItem};
pub use status::{QueueSnapshot, QueueStatus};
