//! Eviction Index Module
//!
//! Time-ordered index of entries used to find expired entries without
//! scanning the whole store.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::Expiry;

// == Eviction Index ==
/// Ordered multiset of `(expiry, entry)` pairs.
///
/// Pairs are stored in a VecDeque where:
/// - Front = Soonest to expire
/// - Back = Latest to expire (`Expiry::Never` last)
///
/// Equal expiries are allowed; among them entries are told apart by
/// pointer identity. The index is not synchronized: the owning cache wraps
/// it in a mutex so each call is one critical section.
#[derive(Debug)]
pub struct EvictionIndex<T> {
    /// Pairs in ascending expiry order
    order: VecDeque<(Expiry, Arc<T>)>,
}

impl<T> Default for EvictionIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EvictionIndex<T> {
    // == Constructor ==
    /// Creates a new empty index.
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    // == Insert ==
    /// Inserts `entry` at its sorted position.
    ///
    /// New pairs go after existing pairs with the same expiry.
    pub fn insert(&mut self, expiry: Expiry, entry: Arc<T>) {
        let pos = self.order.partition_point(|(at, _)| *at <= expiry);
        self.order.insert(pos, (expiry, entry));
    }

    // == Remove Exact ==
    /// Removes the pair matching both `expiry` and the identity of `entry`.
    ///
    /// Returns false if no such pair is present.
    pub fn remove_exact(&mut self, expiry: Expiry, entry: &Arc<T>) -> bool {
        let start = self.order.partition_point(|(at, _)| *at < expiry);
        let found = self
            .order
            .range(start..)
            .take_while(|(at, _)| *at == expiry)
            .position(|(_, candidate)| Arc::ptr_eq(candidate, entry));

        match found {
            Some(offset) => self.order.remove(start + offset).is_some(),
            None => false,
        }
    }

    // == Sweep Expired ==
    /// Removes and returns every entry whose expiry is at or before `now`.
    ///
    /// Stops at the first pair that is not yet due.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<Arc<T>> {
        match self.order.front() {
            Some((at, _)) if at.is_due(now) => {}
            _ => return Vec::new(),
        }
        let due = self.order.partition_point(|(at, _)| at.is_due(now));
        self.order.drain(..due).map(|(_, entry)| entry).collect()
    }

    // == Peek Next ==
    /// Returns the soonest expiry without removing anything.
    #[cfg(test)]
    pub fn next_expiry(&self) -> Option<Expiry> {
        self.order.front().map(|(at, _)| *at)
    }

    // == Clear ==
    /// Drops all pairs.
    pub fn clear(&mut self) {
        self.order.clear();
    }

    // == Length ==
    /// Returns the number of indexed pairs.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // == Contains ==
    /// Checks if `entry` is indexed under any expiry.
    #[cfg(test)]
    pub fn contains(&self, entry: &Arc<T>) -> bool {
        self.order.iter().any(|(_, e)| Arc::ptr_eq(e, entry))
    }

    /// Iterates the pairs in ascending expiry order.
    pub fn iter(&self) -> impl Iterator<Item = (Expiry, &Arc<T>)> {
        self.order.iter().map(|(at, e)| (*at, e))
    }
}
