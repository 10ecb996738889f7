//! Cache Module
//!
//! Provides an in-process cache with TTL expiration and single-flight
//! value computation.

mod engine;
mod entry;
mod eviction;
mod flight;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use engine::{Cache, MAX_RESOLVE_ATTEMPTS};
pub use entry::{CacheEntry, ComputationState, Expiry};
pub use eviction::EvictionIndex;
pub use stats::CacheStats;
pub use store::CacheStore;
