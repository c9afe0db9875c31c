//! Embedding queue dispatcher.
//!
//! [`EmbeddingQueueManager`] owns the queue store and is the only thing that
//! mutates it. Workers run as spawned tasks and report back through
//! `settle`, which applies the outcome under the state lock, persists the
//! pending set and refills freed slots.
//!
//! Every transition appends its event to an outbox while the state lock is
//! held, so the outbox order is the mutation order. Events are delivered
//! with the lock released by a single draining task at a time; a handler
//! that calls back into the manager only appends to the outbox.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use sploot_models::{AssetId, QueueEvent, QueueItem, QueueSnapshot, QueueStatus};
use sploot_queue::{
    AddOutcome, EventBus, Persister, QueuePersistence, QueueStore, Storage, Subscription,
    DEFAULT_MAX_AGE,
};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{EmbedError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::service::{EmbeddingService, EmbeddingStore};
use crate::worker::{EmbeddingWorker, WorkerOutcome};

struct DispatchState {
    store: QueueStore,
    running: bool,
    /// Worker tasks spawned and not yet settled
    active: usize,
    /// Bumped by `clear` so stale settles and re-admissions are ignored
    generation: u64,
    /// Events not yet delivered, in transition order
    outbox: VecDeque<QueueEvent>,
    /// Some task is delivering the outbox
    publishing: bool,
}

impl DispatchState {
    fn is_idle(&self) -> bool {
        self.store.is_empty() && self.active == 0 && self.outbox.is_empty() && !self.publishing
    }
}

struct Shared {
    name: String,
    config: QueueConfig,
    state: Mutex<DispatchState>,
    worker: EmbeddingWorker,
    events: EventBus,
    persister: Persister,
    runtime: Handle,
    settled: Notify,
}

/// Background embedding scheduler.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct EmbeddingQueueManager {
    shared: Arc<Shared>,
}

impl EmbeddingQueueManager {
    /// Build a manager and restore any persisted pending items.
    ///
    /// Must be called from within a Tokio runtime; worker tasks are spawned
    /// onto it. If items were restored and `auto_start` is set, dispatch
    /// begins immediately.
    pub async fn new(
        config: QueueConfig,
        service: Arc<dyn EmbeddingService>,
        embeddings: Arc<dyn EmbeddingStore>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let max_age = chrono::Duration::from_std(config.persistence_max_age).unwrap_or(DEFAULT_MAX_AGE);
        let persistence = Arc::new(
            QueuePersistence::new(storage, config.storage_key.clone()).with_max_age(max_age),
        );
        let restored = persistence.restore().await;

        let runtime = Handle::current();
        let (persister, _writer) = Persister::spawn(persistence, &runtime);

        let worker = EmbeddingWorker::new(service, embeddings, RetryPolicy::from_config(&config))
            .with_job_timeout(config.job_timeout);

        let mut store = QueueStore::new();
        let restored_count = store.restore(restored);

        let name = format!("embedding-queue-{}", Uuid::new_v4());
        let auto_start = config.auto_start;

        let manager = Self {
            shared: Arc::new(Shared {
                name,
                config,
                state: Mutex::new(DispatchState {
                    store,
                    running: false,
                    active: 0,
                    generation: 0,
                    outbox: VecDeque::new(),
                    publishing: false,
                }),
                worker,
                events: EventBus::new(),
                persister,
                runtime,
                settled: Notify::new(),
            }),
        };

        if restored_count > 0 {
            info!(
                queue = %manager.shared.name,
                "Restored {} pending embedding jobs",
                restored_count
            );
            {
                let state = manager.shared.lock();
                manager.shared.persist(&state);
            }
            if auto_start {
                manager.start();
            }
        }

        manager
    }

    /// Enqueue an item.
    ///
    /// Re-adding a live asset never creates a second entry; a pending copy
    /// may be upgraded to high priority. Starts the dispatcher if it is
    /// stopped and `auto_start` is set.
    pub fn add_to_queue(&self, item: QueueItem) -> AddOutcome {
        let outcome = {
            let mut state = self.shared.lock();
            let priority = item.priority;
            let queued = item.clone();
            let outcome = state.store.add(item);

            match outcome {
                AddOutcome::Added => {
                    debug!(asset_id = %queued.asset_id, priority = priority.as_u8(), "Enqueued embedding job");
                    metrics::record_enqueued(priority);
                    state.outbox.push_back(QueueEvent::queued(queued));
                    self.shared.persist(&state);
                }
                AddOutcome::Upgraded => {
                    debug!(asset_id = %queued.asset_id, "Upgraded pending embedding job");
                    self.shared.persist(&state);
                }
                AddOutcome::Duplicate => {
                    debug!(asset_id = %queued.asset_id, "Embedding job already queued");
                    metrics::record_deduplicated();
                }
                AddOutcome::Rejected => {
                    warn!(asset_id = %queued.asset_id, "Refusing to enqueue permanently failed item");
                }
            }

            if !state.running && self.shared.config.auto_start && outcome == AddOutcome::Added {
                info!(queue = %self.shared.name, "Starting embedding queue");
                state.running = true;
            }
            self.shared.pump(&mut state);
            outcome
        };

        self.shared.deliver_events();
        outcome
    }

    /// Begin (or resume) dispatching.
    pub fn start(&self) {
        {
            let mut state = self.shared.lock();
            if !state.running {
                info!(queue = %self.shared.name, "Starting embedding queue");
                state.running = true;
            }
            self.shared.pump(&mut state);
        }
        self.shared.deliver_events();
    }

    /// Stop dispatching new work. In-flight attempts run to completion and
    /// are settled normally.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        if state.running {
            info!(
                queue = %self.shared.name,
                in_flight = state.active,
                "Stopping embedding queue"
            );
        }
        state.running = false;
    }

    /// Drop every item and the persisted snapshot.
    ///
    /// Attempts already in flight finish, but their outcomes are discarded.
    pub fn clear(&self) {
        {
            let mut state = self.shared.lock();
            state.store.clear();
            state.generation += 1;
            self.shared.persister.clear();
            metrics::set_queue_depth(state.store.status());
            info!(queue = %self.shared.name, "Cleared embedding queue");
        }
        self.shared.settled.notify_waiters();
    }

    pub fn is_in_queue(&self, asset_id: &AssetId) -> bool {
        self.shared.lock().store.is_in_queue(asset_id)
    }

    pub fn get_status(&self) -> QueueStatus {
        self.shared.lock().store.status()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Register a synchronous event handler.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    /// Receive events through a channel.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<QueueEvent>) {
        self.shared.events.subscribe_channel()
    }

    /// Wait until nothing is pending, delayed or in flight, and every event
    /// has been delivered.
    ///
    /// Never returns while a stopped queue still holds items, unless they are
    /// cleared.
    pub async fn wait_idle(&self) {
        loop {
            let settled = self.shared.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            if self.shared.lock().is_idle() {
                return;
            }
            settled.await;
        }
    }

    /// Stop, wait for in-flight attempts, and flush the persisted snapshot.
    pub async fn shutdown(&self, grace: Duration) -> WorkerResult<()> {
        self.stop();

        let drained = tokio::time::timeout(grace, async {
            loop {
                let settled = self.shared.settled.notified();
                tokio::pin!(settled);
                settled.as_mut().enable();

                if self.shared.lock().active == 0 {
                    return;
                }
                settled.await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(queue = %self.shared.name, "Shutdown grace period elapsed with jobs in flight");
        }

        self.shared.persister.flush().await?;
        info!(queue = %self.shared.name, "Embedding queue shut down");
        Ok(())
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fill free worker slots.
    ///
    /// Each `processing` event enters the outbox before its worker is
    /// spawned, so it always precedes the outcome event.
    fn pump(self: &Arc<Self>, state: &mut DispatchState) {
        let mut dispatched = false;
        let max_concurrent = self.config.max_concurrent.max(1);

        while state.running && state.active < max_concurrent {
            let Some(item) = state.store.next() else {
                break;
            };
            state.active += 1;
            debug!(
                asset_id = %item.asset_id,
                retry_count = item.retry_count,
                active = state.active,
                "Dispatching embedding job"
            );
            state.outbox.push_back(QueueEvent::processing(item.clone()));
            self.spawn_worker(item, state.generation);
            dispatched = true;
        }

        if dispatched {
            self.persist(state);
        }
    }

    fn spawn_worker(self: &Arc<Self>, item: QueueItem, generation: u64) {
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = match AssertUnwindSafe(shared.worker.run(&item)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => shared
                    .worker
                    .outcome_for_error(&item, EmbedError::other("worker panicked")),
            };
            shared.settle(item, outcome, generation);
        });
    }

    fn settle(self: &Arc<Self>, item: QueueItem, outcome: WorkerOutcome, generation: u64) {
        {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);

            if generation != state.generation || !state.store.is_processing(&item.asset_id) {
                debug!(asset_id = %item.asset_id, "Discarding outcome for cleared job");
            } else {
                let event = self.apply(&mut state, item, outcome, generation);
                state.outbox.push_back(event);
                self.persist(&state);
            }

            self.pump(&mut state);
        }

        self.deliver_events();
        self.settled.notify_waiters();
    }

    fn apply(
        self: &Arc<Self>,
        state: &mut DispatchState,
        item: QueueItem,
        outcome: WorkerOutcome,
        generation: u64,
    ) -> QueueEvent {
        match outcome {
            WorkerOutcome::Completed(_) => {
                let item = state.store.remove(&item.asset_id).unwrap_or(item);
                metrics::record_completed();
                QueueEvent::completed(item)
            }
            WorkerOutcome::Failed { reason, error } => {
                let mut item = state.store.remove(&item.asset_id).unwrap_or(item);
                let error_type = error.error_type();
                item.mark_failed(error_type, true);
                metrics::record_failed(error_type);
                info!(
                    asset_id = %item.asset_id,
                    error_type = %error_type,
                    retry_count = item.retry_count,
                    reason = reason.as_str(),
                    "Embedding job failed permanently"
                );
                QueueEvent::failed(item, error.to_string())
            }
            WorkerOutcome::Retry { delay, error } => {
                let mut item = item;
                let error_type = error.error_type();
                item.record_retry(error_type);
                state.store.defer(item.clone());
                metrics::record_retry(error_type);
                self.schedule_readmit(item.asset_id.clone(), delay, generation);
                QueueEvent::retry(item, error.to_string())
            }
        }
    }

    fn schedule_readmit(self: &Arc<Self>, asset_id: AssetId, delay: Duration, generation: u64) {
        debug!(asset_id = %asset_id, delay_ms = delay.as_millis() as u64, "Scheduling retry");
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            shared.readmit(asset_id, generation);
        });
    }

    fn readmit(self: &Arc<Self>, asset_id: AssetId, generation: u64) {
        {
            let mut state = self.lock();
            if generation != state.generation {
                return;
            }
            let Some(item) = state.store.readmit(&asset_id) else {
                return;
            };
            JobLogger::new(&item, "readmit").log_start("retry delay elapsed");
            self.persist(&state);
            self.pump(&mut state);
        }
        self.deliver_events();
    }

    /// Queue a snapshot of the pending set. Called with the lock held so
    /// snapshots reach the writer in mutation order.
    fn persist(&self, state: &DispatchState) {
        metrics::set_queue_depth(state.store.status());
        self.persister
            .save(QueueSnapshot::new(state.store.persistable()));
    }

    /// Deliver outbox events in order until it is empty.
    ///
    /// Returns at once if another task is already delivering; that task
    /// picks up whatever was appended.
    fn deliver_events(&self) {
        {
            let mut state = self.lock();
            if state.publishing || state.outbox.is_empty() {
                return;
            }
            state.publishing = true;
        }

        loop {
            let event = {
                let mut state = self.lock();
                match state.outbox.pop_front() {
                    Some(event) => event,
                    None => {
                        state.publishing = false;
                        break;
                    }
                }
            };
            self.events.publish(&event);
        }

        self.settled.notify_waiters();
    }
}
