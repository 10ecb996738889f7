//! Cache Store Module
//!
//! Concurrent key to entry mapping with atomic get-or-create.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

// == Cache Store ==
/// Concurrent map from key to shared entry.
///
/// Every method clones the `Arc` out and releases the shard lock before
/// returning, so no caller ever holds a map guard across other locks.
#[derive(Debug)]
pub struct CacheStore<T> {
    entries: DashMap<String, Arc<T>>,
}

impl<T> Default for CacheStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CacheStore<T> {
    // == Constructor ==
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    // == Get ==
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    // == Get Or Insert ==
    /// Returns the existing entry for `key`, or inserts the one built by
    /// `create`. The flag is true when this call inserted.
    ///
    /// Exactly one of any set of racing callers observes `true`.
    pub fn get_or_insert_with(&self, key: &str, create: impl FnOnce() -> T) -> (Arc<T>, bool) {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(existing) => (Arc::clone(existing.get()), false),
            Entry::Vacant(slot) => {
                let entry = Arc::new(create());
                slot.insert(Arc::clone(&entry));
                (entry, true)
            }
        }
    }

    // == Replace ==
    /// Stores `entry` under `key`, returning the entry it displaced.
    pub fn replace(&self, key: &str, entry: Arc<T>) -> Option<Arc<T>> {
        self.entries.insert(key.to_string(), entry)
    }

    // == Remove ==
    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    // == Remove If Same ==
    /// Removes `key` only while it still maps to this exact `entry`.
    pub fn remove_if_same(&self, key: &str, entry: &Arc<T>) -> bool {
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    // == Is Current ==
    /// True while `key` maps to this exact `entry`.
    pub fn is_current(&self, key: &str, entry: &Arc<T>) -> bool {
        self.entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current.value(), entry))
    }

    // == Contains ==
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == Clear ==
    pub fn clear(&self) {
        self.entries.clear();
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_store_new() {
        let store: CacheStore<u32> = CacheStore::new();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_or_insert_creates_once() {
        let store = CacheStore::new();

        let (first, created) = store.get_or_insert_with("k", || 1u32);
        assert!(created);
        let (second, created) = store.get_or_insert_with("k", || 2u32);
        assert!(!created);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_or_insert_race_has_one_winner() {
        let store = Arc::new(CacheStore::new());
        let barrier = Arc::new(Barrier::new(16));
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let barrier = barrier.clone();
                let winners = winners.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let (_, created) = store.get_or_insert_with("k", || i);
                    if created {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_if_same_ignores_replacement() {
        let store = CacheStore::new();
        let (old, _) = store.get_or_insert_with("k", || 1u32);
        let new = Arc::new(2u32);

        let displaced = store.replace("k", new.clone()).unwrap();
        assert!(Arc::ptr_eq(&displaced, &old));

        assert!(!store.remove_if_same("k", &old));
        assert!(store.is_current("k", &new));
        assert!(store.remove_if_same("k", &new));
        assert!(!store.contains_key("k"));
    }

    #[test]
    fn test_remove_and_clear() {
        let store = CacheStore::new();
        store.get_or_insert_with("a", || 1u32);
        store.get_or_insert_with("b", || 2u32);

        assert_eq!(store.remove("a").map(|e| *e), Some(1));
        assert!(store.remove("a").is_none());
        assert_eq!(store.get("b").map(|e| *e), Some(2));

        store.clear();
        assert!(store.is_empty());
    }
}
