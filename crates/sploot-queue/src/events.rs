//! Lifecycle event bus.
//!
//! Handlers run synchronously, in subscription order, on the publishing
//! task. A handler that panics is logged and skipped; the remaining
//! handlers still see the event.
//!
//! ```
//! use sploot_models::{QueueEvent, QueueItem};
//! use sploot_queue::EventBus;
//!
//! # tokio_test::block_on(async {
//! let bus = EventBus::new();
//! let (subscription, mut rx) = bus.subscribe_channel();
//!
//! bus.publish(&QueueEvent::queued(QueueItem::new("asset-1", "https://blob/1", "sum-1")));
//! assert_eq!(rx.recv().await.unwrap().asset_id(), "asset-1");
//!
//! subscription.unsubscribe();
//! # });
//! ```

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use sploot_models::QueueEvent;
use tokio::sync::mpsc;
use tracing::{debug, error};

type Handler = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Synchronous publish/subscribe channel for [`QueueEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Keep the returned [`Subscription`] to remove it.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.register(move |_| handler)
    }

    /// Forward events into an unbounded channel for async consumers.
    ///
    /// The handler removes itself on the first event published after the
    /// receiver is dropped.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<QueueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::downgrade(&self.registry);

        let subscription = self.register(move |id| {
            let handler: Handler = Arc::new(move |event: &QueueEvent| {
                if tx.send(event.clone()).is_ok() {
                    return;
                }
                if let Some(registry) = registry.upgrade() {
                    debug!(subscription = id, "Event receiver dropped, removing handler");
                    lock(&registry).handlers.retain(|(h, _)| *h != id);
                }
            });
            handler
        });
        (subscription, rx)
    }

    fn register(&self, make: impl FnOnce(u64) -> Handler) -> Subscription {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, make(id)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every current subscriber.
    pub fn publish(&self, event: &QueueEvent) {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<Handler> = {
            let registry = lock(&self.registry);
            registry.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        debug!(
            asset_id = %event.item.asset_id,
            event = event.kind.as_str(),
            subscribers = handlers.len(),
            "Publishing queue event"
        );

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(
                    asset_id = %event.item.asset_id,
                    event = event.kind.as_str(),
                    "Queue event handler panicked"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).handlers.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the handler. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = lock(&registry);
        let before = registry.handlers.len();
        registry.handlers.retain(|(id, _)| *id != self.id);
        registry.handlers.len() < before
    }
}
