//! Queue snapshot persistence.
//!
//! Snapshots hold only the pending set. Writes are best-effort: the
//! [`Persister`] funnels every save through one background task so the
//! storage key never sees concurrent writers, and failures are logged
//! rather than surfaced to the queue.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use sploot_models::{QueueItem, QueueSnapshot};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::storage::Storage;

/// Storage key holding the snapshot.
pub const DEFAULT_STORAGE_KEY: &str = "sploot_embedding_queue";

/// Snapshots (and items) older than this are not resurrected.
pub const DEFAULT_MAX_AGE: Duration = Duration::hours(24);

/// Consecutive failures of one write operation logged before muting.
const MAX_LOGGED_FAILURES: u32 = 3;

/// Snapshot reader/writer over a single storage key.
pub struct QueuePersistence {
    storage: Arc<dyn Storage>,
    key: String,
    max_age: Duration,
}

impl QueuePersistence {
    pub fn new(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Set the staleness cutoff applied by [`restore`](Self::restore).
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn save(&self, snapshot: &QueueSnapshot) -> QueueResult<()> {
        let payload = serde_json::to_string(snapshot)?;
        self.storage.set(&self.key, &payload).await
    }

    /// Read the raw snapshot, if any.
    pub async fn load(&self) -> QueueResult<Option<QueueSnapshot>> {
        let Some(payload) = self.storage.get(&self.key).await? else {
            return Ok(None);
        };
        let snapshot = serde_json::from_str(&payload)
            .map_err(|e| QueueError::corrupt_snapshot(e.to_string()))?;
        Ok(Some(snapshot))
    }

    pub async fn clear(&self) -> QueueResult<()> {
        self.storage.delete(&self.key).await
    }

    /// Load the snapshot and return the items worth re-admitting.
    ///
    /// Never fails: unreadable or stale snapshots are cleared and yield an
    /// empty list. Items that are permanently failed, older than the cutoff,
    /// or duplicated by asset are dropped.
    pub async fn restore(&self) -> Vec<QueueItem> {
        let snapshot = match self.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key = %self.key, "Discarding unreadable queue snapshot: {}", e);
                self.clear_quietly().await;
                return Vec::new();
            }
        };

        let now = Utc::now();
        if snapshot.age(now) > self.max_age {
            info!(
                key = %self.key,
                items = snapshot.queue.len(),
                "Discarding stale queue snapshot from {}",
                snapshot.timestamp
            );
            self.clear_quietly().await;
            return Vec::new();
        }

        let cutoff = now - self.max_age;
        let total = snapshot.queue.len();
        let mut seen = HashSet::new();
        let items: Vec<QueueItem> = snapshot
            .queue
            .into_iter()
            .filter(|item| !item.permanently_failed)
            .filter(|item| item.added_at >= cutoff)
            .filter(|item| seen.insert(item.asset_id.clone()))
            .collect();

        if items.len() < total {
            debug!(
                key = %self.key,
                "Dropped {} of {} persisted items on restore",
                total - items.len(),
                total
            );
        }

        items
    }

    async fn clear_quietly(&self) {
        if let Err(e) = self.clear().await {
            warn!(key = %self.key, "Failed to clear queue snapshot: {}", e);
        }
    }
}

enum PersistCommand {
    Save(QueueSnapshot),
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Handle to the single background writer.
///
/// Dropping every handle closes the channel and ends the writer task after
/// it has applied the remaining commands.
#[derive(Clone)]
pub struct Persister {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl Persister {
    /// Spawn the writer task on the given runtime.
    pub fn spawn(
        persistence: Arc<QueuePersistence>,
        runtime: &tokio::runtime::Handle,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(run_writer(persistence, rx));
        (Self { tx }, task)
    }

    /// Queue a snapshot write.
    pub fn save(&self, snapshot: QueueSnapshot) {
        if self.tx.send(PersistCommand::Save(snapshot)).is_err() {
            warn!("Queue persister is closed, snapshot dropped");
        }
    }

    /// Queue removal of the snapshot.
    pub fn clear(&self) {
        if self.tx.send(PersistCommand::Clear).is_err() {
            warn!("Queue persister is closed, clear dropped");
        }
    }

    /// Wait until every command queued before this call has been applied.
    pub async fn flush(&self) -> QueueResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(PersistCommand::Flush(done_tx))
            .map_err(|_| QueueError::PersisterClosed)?;
        done_rx.await.map_err(|_| QueueError::PersisterClosed)
    }
}

async fn run_writer(
    persistence: Arc<QueuePersistence>,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
) {
    let mut failures = WriteFailures::new(persistence.key());
    let mut lookahead: Option<PersistCommand> = None;

    loop {
        let command = match lookahead.take() {
            Some(command) => command,
            None => match rx.recv().await {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            PersistCommand::Save(mut snapshot) => {
                // Only the newest of a run of saves matters.
                while let Ok(next) = rx.try_recv() {
                    match next {
                        PersistCommand::Save(newer) => snapshot = newer,
                        other => {
                            lookahead = Some(other);
                            break;
                        }
                    }
                }
                let result = persistence.save(&snapshot).await;
                failures.observe(WriteOp::Save, result);
            }
            PersistCommand::Clear => {
                let result = persistence.clear().await;
                failures.observe(WriteOp::Clear, result);
            }
            PersistCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!(key = %persistence.key(), "Queue persister stopped");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Save,
    Clear,
}

impl WriteOp {
    fn as_str(self) -> &'static str {
        match self {
            WriteOp::Save => "save",
            WriteOp::Clear => "clear",
        }
    }
}

/// What [`WriteFailures::observe`] reported for one write.
#[derive(Debug, PartialEq, Eq)]
enum WriteReport {
    Quiet,
    Logged,
    Muted,
    Recovered(u32),
}

/// Per-operation failure streaks for the snapshot key.
///
/// A failing save does not mute clear errors and vice versa. Once an
/// operation has failed more than [`MAX_LOGGED_FAILURES`] times in a row its
/// errors are muted until it next succeeds.
#[derive(Debug)]
struct WriteFailures {
    key: String,
    save_streak: u32,
    clear_streak: u32,
}

impl WriteFailures {
    fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            save_streak: 0,
            clear_streak: 0,
        }
    }

    fn streak(&mut self, op: WriteOp) -> &mut u32 {
        match op {
            WriteOp::Save => &mut self.save_streak,
            WriteOp::Clear => &mut self.clear_streak,
        }
    }

    fn observe(&mut self, op: WriteOp, result: QueueResult<()>) -> WriteReport {
        let streak = self.streak(op);

        let error = match result {
            Ok(()) => {
                let failures = std::mem::take(streak);
                if failures <= MAX_LOGGED_FAILURES {
                    return WriteReport::Quiet;
                }
                info!(
                    key = %self.key,
                    op = op.as_str(),
                    failures,
                    "Queue snapshot {} recovered",
                    op.as_str()
                );
                return WriteReport::Recovered(failures);
            }
            Err(e) => e,
        };

        *streak += 1;
        let failures = *streak;

        if failures <= MAX_LOGGED_FAILURES {
            warn!(
                key = %self.key,
                op = op.as_str(),
                failures,
                "Queue snapshot {} failed: {}",
                op.as_str(),
                error
            );
            WriteReport::Logged
        } else if failures == MAX_LOGGED_FAILURES + 1 {
            warn!(
                key = %self.key,
                op = op.as_str(),
                failures,
                "Queue snapshot {} keeps failing, muting errors until it succeeds: {}",
                op.as_str(),
                error
            );
            WriteReport::Muted
        } else {
            WriteReport::Quiet
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use sploot_models::Priority;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn persistence(storage: Arc<dyn Storage>) -> QueuePersistence {
        QueuePersistence::new(storage, DEFAULT_STORAGE_KEY)
    }

    /// Counts writes and always fails them.
    #[derive(Default)]
    struct BrokenStorage {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl Storage for BrokenStorage {
        async fn get(&self, _key: &str) -> QueueResult<Option<String>> {
            Err(QueueError::storage_failed("quota exceeded"))
        }

        async fn set(&self, _key: &str, _value: &str) -> QueueResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::storage_failed("quota exceeded"))
        }

        async fn delete(&self, _key: &str) -> QueueResult<()> {
            Err(QueueError::storage_failed("quota exceeded"))
        }
    }

    #[tokio::test]
    async fn test_save_load_clear() {
        let storage = Arc::new(MemoryStorage::new());
        let persistence = persistence(storage.clone());

        assert!(persistence.load().await.unwrap().is_none());

        let items = vec![
            QueueItem::new("a", "u", "c").with_priority(Priority::High),
            QueueItem::new("b", "u", "c"),
        ];
        persistence.save(&QueueSnapshot::new(items.clone())).await.unwrap();

        let loaded = persistence.load().await.unwrap().unwrap();
        let summary: Vec<(&str, Priority)> = loaded
            .queue
            .iter()
            .map(|i| (i.asset_id.as_str(), i.priority))
            .collect();
        assert_eq!(summary, vec![("a", Priority::High), ("b", Priority::Normal)]);
        assert_eq!(
            loaded.queue[0].added_at.timestamp_millis(),
            items[0].added_at.timestamp_millis()
        );

        persistence.clear().await.unwrap();
        assert!(persistence.load().await.unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_restore_filters_items() {
        let storage = Arc::new(MemoryStorage::new());
        let persistence = persistence(storage);

        let mut failed = QueueItem::new("failed", "u", "c");
        failed.permanently_failed = true;
        let ancient = QueueItem::new("ancient", "u", "c").with_added_at(Utc::now() - Duration::days(3));
        let mut retried = QueueItem::new("retried", "u", "c");
        retried.retry_count = 2;

        persistence
            .save(&QueueSnapshot::new(vec![
                QueueItem::new("fresh", "u", "c"),
                failed,
                ancient,
                retried,
                QueueItem::new("fresh", "u2", "c2"),
            ]))
            .await
            .unwrap();

        let restored = persistence.restore().await;
        let ids: Vec<&str> = restored.iter().map(|i| i.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "retried"]);
        assert_eq!(restored[0].blob_url, "u");
        assert_eq!(restored[1].retry_count, 2);
    }

    #[tokio::test]
    async fn test_restore_discards_stale_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        let persistence = persistence(storage.clone()).with_max_age(Duration::hours(1));

        let mut snapshot = QueueSnapshot::new(vec![QueueItem::new("a", "u", "c")]);
        snapshot.timestamp = Utc::now() - Duration::hours(2);
        persistence.save(&snapshot).await.unwrap();

        assert!(persistence.restore().await.is_empty());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_restore_discards_corrupt_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(DEFAULT_STORAGE_KEY, "{not json").await.unwrap();
        let persistence = persistence(storage.clone());

        assert!(matches!(persistence.load().await, Err(QueueError::CorruptSnapshot(_))));
        assert!(persistence.restore().await.is_empty());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_restore_tolerates_storage_errors() {
        let persistence = persistence(Arc::new(BrokenStorage::default()));
        assert!(persistence.restore().await.is_empty());
    }

    #[tokio::test]
    async fn test_persister_applies_latest_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        let persistence = Arc::new(persistence(storage));
        let (persister, _task) = Persister::spawn(persistence.clone(), &tokio::runtime::Handle::current());

        persister.save(QueueSnapshot::new(vec![QueueItem::new("a", "u", "c")]));
        persister.save(QueueSnapshot::new(vec![
            QueueItem::new("a", "u", "c"),
            QueueItem::new("b", "u", "c"),
        ]));
        persister.flush().await.unwrap();

        let loaded = persistence.load().await.unwrap().unwrap();
        assert_eq!(loaded.queue.len(), 2);

        persister.clear();
        persister.flush().await.unwrap();
        assert!(persistence.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persister_survives_write_failures() {
        let storage = Arc::new(BrokenStorage::default());
        let persistence = Arc::new(QueuePersistence::new(storage.clone(), DEFAULT_STORAGE_KEY));
        let (persister, _task) = Persister::spawn(persistence, &tokio::runtime::Handle::current());

        for _ in 0..6 {
            persister.save(QueueSnapshot::new(Vec::new()));
            persister.flush().await.unwrap();
        }

        assert_eq!(storage.writes.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_write_failures_mute_per_operation() {
        let mut failures = WriteFailures::new(DEFAULT_STORAGE_KEY);
        let broken = || Err(QueueError::storage_failed("quota exceeded"));

        let reports: Vec<WriteReport> = (0..5).map(|_| failures.observe(WriteOp::Save, broken())).collect();
        assert_eq!(
            reports,
            vec![
                WriteReport::Logged,
                WriteReport::Logged,
                WriteReport::Logged,
                WriteReport::Muted,
                WriteReport::Quiet,
            ]
        );

        // Muted saves leave clear errors visible.
        assert_eq!(failures.observe(WriteOp::Clear, broken()), WriteReport::Logged);
        assert_eq!(failures.observe(WriteOp::Clear, Ok(())), WriteReport::Quiet);

        assert_eq!(failures.observe(WriteOp::Save, Ok(())), WriteReport::Recovered(5));
        assert_eq!(failures.observe(WriteOp::Save, broken()), WriteReport::Logged);
    }
}
