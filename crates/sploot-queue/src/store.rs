//! In-memory queue state.
//!
//! Items live in exactly one of three sets:
//! - `pending`: ordered by tier, high before normal, FIFO within a tier
//! - `processing`: handed to a worker, never reordered or preempted
//! - `delayed`: sitting out a retry delay before re-admission
//!
//! The store is plain data. Locking, persistence and events belong to the
//! dispatcher that owns it.

use std::collections::{HashMap, VecDeque};

use sploot_models::{AssetId, Priority, QueueItem, QueueStatus};

/// Result of [`QueueStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New pending item
    Added,
    /// Already live; a pending/delayed copy took the higher priority or user flag
    Upgraded,
    /// Already live, nothing changed
    Duplicate,
    /// Permanently failed items are never re-admitted
    Rejected,
}

#[derive(Debug, Default)]
pub struct QueueStore {
    pending: VecDeque<QueueItem>,
    processing: HashMap<AssetId, QueueItem>,
    delayed: HashMap<AssetId, QueueItem>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit restored items, oldest first within each tier.
    ///
    /// Returns how many were admitted.
    pub fn restore(&mut self, mut items: Vec<QueueItem>) -> usize {
        items.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.added_at.cmp(&b.added_at)));
        items
            .into_iter()
            .map(|item| self.add(item))
            .filter(|outcome| *outcome == AddOutcome::Added)
            .count()
    }

    /// Insert a new pending item, or merge into the live copy.
    pub fn add(&mut self, item: QueueItem) -> AddOutcome {
        if item.permanently_failed {
            return AddOutcome::Rejected;
        }
        if self.processing.contains_key(&item.asset_id) {
            return AddOutcome::Duplicate;
        }

        if let Some(existing) = self.delayed.get_mut(&item.asset_id) {
            return merge_request(existing, &item);
        }

        if let Some(pos) = self.pending.iter().position(|p| p.asset_id == item.asset_id) {
            let outcome = merge_request(&mut self.pending[pos], &item);
            if outcome == AddOutcome::Upgraded {
                // Re-slot in case the tier changed.
                if let Some(existing) = self.pending.remove(pos) {
                    self.insert_pending(existing);
                }
            }
            return outcome;
        }

        self.insert_pending(item);
        AddOutcome::Added
    }

    /// Pop the next eligible pending item and mark it processing.
    pub fn next(&mut self) -> Option<QueueItem> {
        let item = self.pending.pop_front()?;
        self.processing.insert(item.asset_id.clone(), item.clone());
        Some(item)
    }

    /// Peek at the item [`next`](Self::next) would return.
    pub fn peek(&self) -> Option<&QueueItem> {
        self.pending.front()
    }

    /// Remove an item from whichever set holds it.
    pub fn remove(&mut self, asset_id: &AssetId) -> Option<QueueItem> {
        if let Some(item) = self.processing.remove(asset_id) {
            return Some(item);
        }
        if let Some(item) = self.delayed.remove(asset_id) {
            return Some(item);
        }
        let pos = self.pending.iter().position(|p| &p.asset_id == asset_id)?;
        self.pending.remove(pos)
    }

    /// Move a processing item into the delayed set with its updated state.
    ///
    /// Returns `false` if the item was no longer processing (e.g. cleared).
    pub fn defer(&mut self, item: QueueItem) -> bool {
        if self.processing.remove(&item.asset_id).is_none() {
            return false;
        }
        self.delayed.insert(item.asset_id.clone(), item);
        true
    }

    /// Move a delayed item back into the pending set.
    pub fn readmit(&mut self, asset_id: &AssetId) -> Option<QueueItem> {
        let item = self.delayed.remove(asset_id)?;
        self.insert_pending(item.clone());
        Some(item)
    }

    /// Present in any live set.
    pub fn is_in_queue(&self, asset_id: &AssetId) -> bool {
        self.processing.contains_key(asset_id)
            || self.delayed.contains_key(asset_id)
            || self.pending.iter().any(|p| &p.asset_id == asset_id)
    }

    pub fn is_processing(&self, asset_id: &AssetId) -> bool {
        self.processing.contains_key(asset_id)
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queued: self.pending.len() + self.delayed.len(),
            processing: self.processing.len(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Items worth persisting: pending first, then delayed. Processing items
    /// are excluded.
    pub fn persistable(&self) -> Vec<QueueItem> {
        let mut delayed: Vec<QueueItem> = self.delayed.values().cloned().collect();
        delayed.sort_by(|a, b| a.added_at.cmp(&b.added_at));

        self.pending.iter().cloned().chain(delayed).collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.processing.clear();
        self.delayed.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.processing.is_empty() && self.delayed.is_empty()
    }

    /// Behind every pending item of the same or higher priority.
    fn insert_pending(&mut self, item: QueueItem) {
        let pos = self
            .pending
            .iter()
            .position(|p| p.priority > item.priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, item);
    }
}

fn merge_request(existing: &mut QueueItem, request: &QueueItem) -> AddOutcome {
    let mut changed = false;
    if request.priority == Priority::High && existing.priority != Priority::High {
        existing.priority = Priority::High;
        changed = true;
    }
    if request.is_user_triggered && !existing.is_user_triggered {
        existing.is_user_triggered = true;
        changed = true;
    }
    if changed {
        AddOutcome::Upgraded
    } else {
        AddOutcome::Duplicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sploot_models::ErrorType;

    fn normal(id: &str) -> QueueItem {
        QueueItem::new(id, format!("https://blob/{id}"), format!("sum-{id}"))
    }

    fn high(id: &str) -> QueueItem {
        normal(id).with_priority(Priority::High)
    }

    fn drain(store: &mut QueueStore) -> Vec<String> {
        std::iter::from_fn(|| store.next())
            .map(|i| i.asset_id.to_string())
            .collect()
    }

    #[test]
    fn test_high_priority_jumps_pending_normals() {
        let mut store = QueueStore::new();
        store.add(normal("n1"));
        store.add(normal("n2"));
        store.add(high("h1"));
        store.add(normal("n3"));
        store.add(high("h2"));

        assert_eq!(drain(&mut store), vec!["h1", "h2", "n1", "n2", "n3"]);
    }

    #[test]
    fn test_high_priority_never_preempts_processing() {
        let mut store = QueueStore::new();
        store.add(normal("n1"));
        let first = store.next().unwrap();
        assert_eq!(first.asset_id.as_str(), "n1");

        store.add(high("h1"));
        assert!(store.is_processing(&AssetId::from("n1")));
        assert_eq!(store.peek().unwrap().asset_id.as_str(), "h1");
        assert_eq!(store.status(), QueueStatus { queued: 1, processing: 1 });
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut store = QueueStore::new();
        assert_eq!(store.add(normal("a")), AddOutcome::Added);
        assert_eq!(store.add(normal("a")), AddOutcome::Duplicate);
        assert_eq!(store.status().queued, 1);

        store.next();
        assert_eq!(store.add(high("a")), AddOutcome::Duplicate);
        assert_eq!(store.status(), QueueStatus { queued: 0, processing: 1 });
        assert!(store.is_in_queue(&AssetId::from("a")));
    }

    #[test]
    fn test_permanently_failed_is_rejected() {
        let mut store = QueueStore::new();
        let mut item = normal("a");
        item.permanently_failed = true;

        assert_eq!(store.add(item), AddOutcome::Rejected);
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_add_upgrades_pending_priority() {
        let mut store = QueueStore::new();
        store.add(normal("n1"));
        store.add(normal("n2"));

        assert_eq!(store.add(high("n2").user_triggered(true)), AddOutcome::Upgraded);
        assert_eq!(store.status().queued, 2);

        let first = store.next().unwrap();
        assert_eq!(first.asset_id.as_str(), "n2");
        assert!(first.is_user_triggered);
    }

    #[test]
    fn test_defer_and_readmit() {
        let mut store = QueueStore::new();
        store.add(normal("a"));
        store.add(normal("b"));

        let mut item = store.next().unwrap();
        item.record_retry(ErrorType::Network);
        assert!(store.defer(item));
        assert_eq!(store.status(), QueueStatus { queued: 2, processing: 0 });
        assert!(store.is_in_queue(&AssetId::from("a")));

        let readmitted = store.readmit(&AssetId::from("a")).unwrap();
        assert_eq!(readmitted.retry_count, 1);
        assert_eq!(drain(&mut store), vec!["b", "a"]);
    }

    #[test]
    fn test_defer_after_clear_is_ignored() {
        let mut store = QueueStore::new();
        store.add(normal("a"));
        let item = store.next().unwrap();
        store.clear();

        assert!(!store.defer(item));
        assert!(store.readmit(&AssetId::from("a")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_from_any_set() {
        let mut store = QueueStore::new();
        store.add(normal("running"));
        store.add(normal("waiting"));
        store.add(normal("pending"));
        store.next();
        let waiting = store.next().unwrap();
        assert!(store.defer(waiting));

        assert!(store.remove(&AssetId::from("pending")).is_some());
        assert!(store.remove(&AssetId::from("running")).is_some());
        assert!(store.remove(&AssetId::from("missing")).is_none());
        assert_eq!(store.status(), QueueStatus { queued: 1, processing: 0 });
    }

    #[test]
    fn test_restore_orders_by_tier_then_age() {
        let now = Utc::now();
        let mut store = QueueStore::new();
        let admitted = store.restore(vec![
            normal("n-new").with_added_at(now),
            high("h-new").with_added_at(now),
            normal("n-old").with_added_at(now - Duration::minutes(5)),
            high("h-old").with_added_at(now - Duration::minutes(5)),
            normal("n-old").with_added_at(now),
        ]);

        assert_eq!(admitted, 4);
        assert_eq!(drain(&mut store), vec!["h-old", "h-new", "n-old", "n-new"]);
    }

    #[test]
    fn test_persistable_excludes_processing() {
        let mut store = QueueStore::new();
        store.add(normal("running"));
        store.add(normal("pending"));
        store.next();

        let ids: Vec<String> = store
            .persistable()
            .into_iter()
            .map(|i| i.asset_id.to_string())
            .collect();
        assert_eq!(ids, vec!["pending"]);
    }
}
