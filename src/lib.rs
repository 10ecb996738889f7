//! Flightcache - an in-process TTL cache with single-flight computation
//!
//! Values are computed at most once per key at a time; every concurrent
//! caller for a key shares the outcome. Expired entries are found through a
//! time-ordered index and swept at the start of each operation.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{Cache, CacheStats, ComputationState};
pub use chrono::TimeDelta;
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
pub use tokio_util::sync::CancellationToken;
