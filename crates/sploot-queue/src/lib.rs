//! Embedding queue state.
//!
//! This crate provides:
//! - The ordered, priority-aware queue store
//! - Durable snapshots behind a swappable key/value `Storage`
//! - A single-writer background persister
//! - The lifecycle event bus

pub mod error;
pub mod events;
pub mod persistence;
pub mod storage;
pub mod store;

pub use error::{QueueError, QueueResult};
pub use events::{EventBus, Subscription};
pub use persistence::{Persister, QueuePersistence, DEFAULT_MAX_AGE, DEFAULT_STORAGE_KEY};
pub use storage::{FileStorage, MemoryStorage, RedisStorage, Storage};
pub use store::{AddOutcome, QueueStore};
