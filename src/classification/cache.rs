//! Category result cache
//!
//! Maps tracking IDs to classification results. `reserve` is an atomic
//! check-then-set, so only the first caller for an ID ever gets to issue a
//! classification request. Failed requests are released so a later
//! confirmation can retry.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::detection::TrackingId;

/// Cached classification state for one tracking ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryResult {
    /// Request issued, no result yet
    Pending,
    /// Classification finished
    Ready(String),
}

impl CategoryResult {
    /// Label if ready
    pub fn label(&self) -> Option<&str> {
        match self {
            CategoryResult::Pending => None,
            CategoryResult::Ready(label) => Some(label.as_str()),
        }
    }
}

/// Outcome of `CategoryCache::reserve`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// No entry existed; the caller now owns the request
    Reserved,
    /// An entry already exists
    Existing(CategoryResult),
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<TrackingId, CategoryResult>,
    /// Ready entries, oldest first
    ready_order: VecDeque<TrackingId>,
}

/// Shared tracking-ID → category store
#[derive(Debug, Default)]
pub struct CategoryCache {
    inner: Mutex<CacheInner>,
    max_entries: Option<usize>,
}

impl CategoryCache {
    /// Cache that evicts the oldest ready entries past `max_entries`
    pub fn with_max_entries(max_entries: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_entries,
        }
    }

    /// Mark `tracking_id` pending unless an entry already exists
    pub fn reserve(&self, tracking_id: TrackingId) -> Reservation {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.entries.get(&tracking_id) {
            return Reservation::Existing(existing.clone());
        }

        inner.entries.insert(tracking_id, CategoryResult::Pending);
        Reservation::Reserved
    }

    /// Store a finished result
    pub fn complete(&self, tracking_id: TrackingId, label: String) {
        let mut inner = self.inner.lock();
        inner.entries.insert(tracking_id, CategoryResult::Ready(label));
        inner.ready_order.retain(|id| *id != tracking_id);
        inner.ready_order.push_back(tracking_id);

        if let Some(max) = self.max_entries {
            // The entry just stored is never the one evicted
            while inner.entries.len() > max {
                let Some(position) = inner.ready_order.iter().position(|id| *id != tracking_id) else {
                    break;
                };
                if let Some(oldest) = inner.ready_order.remove(position) {
                    inner.entries.remove(&oldest);
                    debug!("Evicted cached category for object {}", oldest);
                }
            }
        }
    }

    /// Drop a pending entry so the ID can be classified again.
    ///
    /// Returns false if the entry was not pending.
    pub fn release(&self, tracking_id: TrackingId) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.get(&tracking_id) == Some(&CategoryResult::Pending) {
            inner.entries.remove(&tracking_id);
            true
        } else {
            false
        }
    }

    pub fn get(&self, tracking_id: TrackingId) -> Option<CategoryResult> {
        self.inner.lock().entries.get(&tracking_id).cloned()
    }

    /// Copy of every entry, for the UI
    pub fn snapshot(&self) -> HashMap<TrackingId, CategoryResult> {
        self.inner.lock().entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_reserve_is_at_most_once() {
        let cache = CategoryCache::default();

        assert_eq!(cache.reserve(7), Reservation::Reserved);
        assert_eq!(cache.reserve(7), Reservation::Existing(CategoryResult::Pending));

        cache.complete(7, "Books".to_string());
        assert_eq!(
            cache.reserve(7),
            Reservation::Existing(CategoryResult::Ready("Books".to_string()))
        );
    }

    #[test]
    fn test_concurrent_reserve_single_winner() {
        let cache = Arc::new(CategoryCache::default());
        let winners = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let winners = winners.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    if cache.reserve(42) == Reservation::Reserved {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_allows_retry() {
        let cache = CategoryCache::default();

        cache.reserve(1);
        assert!(cache.release(1));
        assert!(cache.get(1).is_none());
        assert_eq!(cache.reserve(1), Reservation::Reserved);
    }

    #[test]
    fn test_release_keeps_ready_entries() {
        let cache = CategoryCache::default();

        cache.reserve(1);
        cache.complete(1, "Art".to_string());
        assert!(!cache.release(1));
        assert_eq!(cache.get(1).and_then(|r| r.label().map(String::from)), Some("Art".to_string()));
    }

    #[test]
    fn test_unbounded_by_default() {
        let cache = CategoryCache::default();
        for id in 0..500 {
            cache.reserve(id);
            cache.complete(id, format!("label {}", id));
        }
        assert_eq!(cache.snapshot().len(), 500);
    }

    #[test]
    fn test_eviction_skips_pending() {
        let cache = CategoryCache::with_max_entries(Some(2));

        cache.reserve(1);
        cache.reserve(2);
        cache.complete(2, "Travel".to_string());
        cache.reserve(3);
        cache.complete(3, "Crafts".to_string());

        // Entry 2 was the oldest ready one
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(&1), Some(&CategoryResult::Pending));
        assert!(!snapshot.contains_key(&2));
        assert_eq!(snapshot.get(&3), Some(&CategoryResult::Ready("Crafts".to_string())));
    }

    #[test]
    fn test_full_cache_keeps_latest_result() {
        let cache = CategoryCache::with_max_entries(Some(1));

        cache.reserve(1);
        cache.reserve(2);
        cache.complete(2, "Music".to_string());

        // Only pending entries are left to evict, so the new label stays
        assert_eq!(cache.get(2), Some(CategoryResult::Ready("Music".to_string())));
        assert_eq!(cache.reserve(2), Reservation::Existing(CategoryResult::Ready("Music".to_string())));
        assert_eq!(cache.get(1), Some(CategoryResult::Pending));
    }
}
