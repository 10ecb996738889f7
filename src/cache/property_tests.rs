//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the eviction index ordering and the cache's
//! key/value semantics against simple models.

use proptest::prelude::*;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{Cache, EvictionIndex, Expiry};
use crate::error::CacheError;

// == Strategies ==
/// Generates cache keys from a small alphabet so operations collide
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-e]{1,2}".prop_map(|s| s)
}

/// Offsets in milliseconds; `None` stands for a non-expiring entry
fn expiry_offset_strategy() -> impl Strategy<Value = Option<u64>> {
    prop_oneof![
        4 => (0u64..50).prop_map(Some),
        1 => Just(None),
    ]
}

#[derive(Debug, Clone)]
enum IndexOp {
    Insert(Option<u64>),
    Remove(usize),
    Sweep(u64),
}

fn index_op_strategy() -> impl Strategy<Value = IndexOp> {
    prop_oneof![
        3 => expiry_offset_strategy().prop_map(IndexOp::Insert),
        2 => any::<usize>().prop_map(IndexOp::Remove),
        1 => (0u64..60).prop_map(IndexOp::Sweep),
    ]
}

#[derive(Debug, Clone)]
enum CacheOp {
    Add { key: String, value: u32 },
    Resolve { key: String, value: u32 },
    Remove { key: String },
    Get { key: String },
    Reset { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (key_strategy(), any::<u32>()).prop_map(|(key, value)| CacheOp::Add { key, value }),
        (key_strategy(), any::<u32>()).prop_map(|(key, value)| CacheOp::Resolve { key, value }),
        key_strategy().prop_map(|key| CacheOp::Remove { key }),
        key_strategy().prop_map(|key| CacheOp::Get { key }),
        key_strategy().prop_map(|key| CacheOp::Reset { key }),
    ]
}

fn expiry_at(base: Instant, offset: Option<u64>) -> Expiry {
    offset.map_or(Expiry::Never, |ms| Expiry::At(base + Duration::from_millis(ms)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // *For any* sequence of inserts, exact removals and sweeps, the index
    // stays sorted, holds exactly the live pairs, and a sweep returns exactly
    // the pairs that were due.
    #[test]
    fn prop_index_matches_model(ops in prop::collection::vec(index_op_strategy(), 1..80)) {
        let base = Instant::now();
        let mut index = EvictionIndex::new();
        let mut model: Vec<(Expiry, Arc<usize>)> = Vec::new();

        for (n, op) in ops.into_iter().enumerate() {
            match op {
                IndexOp::Insert(offset) => {
                    let entry = Arc::new(n);
                    let expiry = expiry_at(base, offset);
                    index.insert(expiry, entry.clone());
                    model.push((expiry, entry));
                }
                IndexOp::Remove(pick) => {
                    if model.is_empty() {
                        continue;
                    }
                    let (expiry, entry) = model.remove(pick % model.len());
                    prop_assert!(index.remove_exact(expiry, &entry));
                    prop_assert!(!index.remove_exact(expiry, &entry));
                }
                IndexOp::Sweep(offset) => {
                    let now = base + Duration::from_millis(offset);
                    let mut swept: Vec<usize> =
                        index.sweep_expired(now).iter().map(|e| **e).collect();
                    let mut due: Vec<usize> = model
                        .iter()
                        .filter(|(at, _)| at.is_due(now))
                        .map(|(_, e)| **e)
                        .collect();
                    model.retain(|(at, _)| !at.is_due(now));
                    swept.sort_unstable();
                    due.sort_unstable();
                    prop_assert_eq!(swept, due);
                }
            }

            prop_assert_eq!(index.len(), model.len());
            let expiries: Vec<Expiry> = index.iter().map(|(at, _)| at).collect();
            prop_assert!(expiries.windows(2).all(|w| w[0] <= w[1]), "Index out of order");
        }
    }

    // *For any* sequence of operations on non-expiring entries, the cache
    // behaves like a map where resolve only fills absent keys.
    #[test]
    fn prop_cache_matches_map_model(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let cache: Cache<u32> = Cache::new(None);
        let mut model: HashMap<String, u32> = HashMap::new();

        for op in ops {
            match op {
                CacheOp::Add { key, value } => {
                    cache.add_or_replace(&key, value);
                    model.insert(key, value);
                }
                CacheOp::Resolve { key, value } => {
                    let resolved = tokio_test::block_on(
                        cache.resolve(&key, |_| async move { Ok::<_, Infallible>(value) }),
                    )
                    .unwrap();
                    let expected = *model.entry(key).or_insert(value);
                    prop_assert_eq!(resolved, expected);
                }
                CacheOp::Remove { key } => {
                    prop_assert_eq!(cache.remove(&key), model.remove(&key).is_some());
                }
                CacheOp::Get { key } => {
                    let got = tokio_test::block_on(cache.get(&key));
                    match model.get(&key) {
                        Some(expected) => prop_assert_eq!(got.unwrap(), *expected),
                        None => prop_assert!(matches!(got, Err(CacheError::NotFound(_)))),
                    }
                }
                CacheOp::Reset { key } => {
                    prop_assert_eq!(cache.reset(&key).is_ok(), model.contains_key(&key));
                }
            }

            prop_assert_eq!(cache.len(), model.len(), "Entry count mismatch");
        }
    }
}
