//! Cache Entry Module
//!
//! Defines the per-key slot: TTL bookkeeping plus the single-assignment
//! computation state that every resolver of the key shares.

use std::time::{Duration, Instant};

use chrono::TimeDelta;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, Result};

// == Expiry ==
/// Absolute expiration point of an entry.
///
/// `Never` orders after every `At`, so entries without a TTL sort to the
/// back of the eviction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Expiry {
    /// Expires at the given instant
    At(Instant),
    /// Never expires
    Never,
}

impl Expiry {
    // == Constructor ==
    /// Computes the expiry for `ttl` measured from `now`.
    ///
    /// Negative TTLs produce an instant in the past.
    pub fn from_ttl(ttl: Option<TimeDelta>, now: Instant) -> Self {
        let Some(ttl) = ttl else {
            return Expiry::Never;
        };
        match ttl.to_std() {
            Ok(ahead) => now.checked_add(ahead).map_or(Expiry::Never, Expiry::At),
            Err(_) => {
                let behind = ttl.abs().to_std().unwrap_or(Duration::ZERO);
                Expiry::At(now.checked_sub(behind).unwrap_or(now))
            }
        }
    }

    /// True once `now` is strictly past the expiration point.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            Expiry::At(at) => now > *at,
            Expiry::Never => false,
        }
    }

    /// True when the expiration point is at or before `now`.
    ///
    /// The eviction sweep uses this inclusive form.
    pub fn is_due(&self, now: Instant) -> bool {
        match self {
            Expiry::At(at) => *at <= now,
            Expiry::Never => false,
        }
    }

    /// Signed milliseconds until expiry; infinite for `Never`.
    pub fn milliseconds_remaining(&self, now: Instant) -> f64 {
        match self {
            Expiry::At(at) if *at >= now => millis(at.duration_since(now)),
            Expiry::At(at) => -millis(now.duration_since(*at)),
            Expiry::Never => f64::INFINITY,
        }
    }
}

fn millis(span: Duration) -> f64 {
    span.as_nanos() as f64 / 1_000_000.0
}

// == Computation State ==
/// Observable lifecycle state of an entry's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationState {
    NotStarted,
    Computing,
    Ready,
    Failed,
    Killed,
}

/// Single-assignment slot broadcast to every waiter.
#[derive(Debug, Clone)]
enum Slot<V> {
    NotStarted,
    Computing,
    Ready(V),
    Failed(CacheError),
}

impl<V: Clone> Slot<V> {
    fn is_settled(&self) -> bool {
        matches!(self, Slot::Ready(_) | Slot::Failed(_))
    }

    fn outcome(&self) -> Option<Result<V>> {
        match self {
            Slot::Ready(value) => Some(Ok(value.clone())),
            Slot::Failed(err) => Some(Err(err.clone())),
            Slot::NotStarted | Slot::Computing => None,
        }
    }
}

// == Cache Entry ==
/// Represents a single cache entry with its lazily computed value.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// The key this entry is stored under
    key: String,
    /// TTL the expiry is computed from on creation and reset
    ttl: Option<TimeDelta>,
    /// Current expiration point; mirrors the entry's eviction index position
    expires_at: Mutex<Expiry>,
    /// Computation slot, published exactly once
    slot: watch::Sender<Slot<V>>,
    /// Tripped by `remove_and_kill`
    cancel: CancellationToken,
}

impl<V: Clone> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry whose value has not been computed yet.
    pub fn new(key: impl Into<String>, ttl: Option<TimeDelta>, now: Instant) -> Self {
        Self::with_slot(key.into(), ttl, now, Slot::NotStarted)
    }

    /// Creates an entry that already holds `value`.
    pub fn ready(key: impl Into<String>, value: V, ttl: Option<TimeDelta>, now: Instant) -> Self {
        Self::with_slot(key.into(), ttl, now, Slot::Ready(value))
    }

    fn with_slot(key: String, ttl: Option<TimeDelta>, now: Instant, slot: Slot<V>) -> Self {
        let (slot, _) = watch::channel(slot);
        Self {
            key,
            ttl,
            expires_at: Mutex::new(Expiry::from_ttl(ttl, now)),
            slot,
            cancel: CancellationToken::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Option<TimeDelta> {
        self.ttl
    }

    pub fn expires_at(&self) -> Expiry {
        *self.expires_at.lock()
    }

    // == Reset ==
    /// Recomputes the expiry from `now` using the stored TTL.
    ///
    /// The caller must have taken the entry out of the eviction index first
    /// and reinsert it under the returned expiry afterwards.
    pub fn reset(&self, now: Instant) -> Expiry {
        let expiry = Expiry::from_ttl(self.ttl, now);
        *self.expires_at.lock() = expiry;
        expiry
    }

    /// Parks the expiry at `Never` while the value is still being computed.
    ///
    /// Same index contract as `reset`; the completing owner re-times it.
    pub(crate) fn hold(&self) -> Expiry {
        *self.expires_at.lock() = Expiry::Never;
        Expiry::Never
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at().is_expired(now)
    }

    // == Time To Live ==
    /// Returns signed milliseconds until expiry. Not clamped at zero.
    pub fn milliseconds_remaining(&self, now: Instant) -> f64 {
        self.expires_at().milliseconds_remaining(now)
    }

    // == State ==
    pub fn state(&self) -> ComputationState {
        match &*self.slot.borrow() {
            Slot::NotStarted => ComputationState::NotStarted,
            Slot::Computing => ComputationState::Computing,
            Slot::Ready(_) => ComputationState::Ready,
            Slot::Failed(CacheError::Killed(_)) => ComputationState::Killed,
            Slot::Failed(_) => ComputationState::Failed,
        }
    }

    /// True while no outcome has been published.
    pub fn is_pending(&self) -> bool {
        !self.slot.borrow().is_settled()
    }

    /// Marks the computation as started. Returns false if it already was.
    pub(crate) fn begin(&self) -> bool {
        self.slot.send_if_modified(|slot| match slot {
            Slot::NotStarted => {
                *slot = Slot::Computing;
                true
            }
            _ => false,
        })
    }

    /// Publishes the outcome. Only the first publication sticks.
    pub(crate) fn publish(&self, outcome: Result<V>) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_settled() {
                return false;
            }
            *slot = match outcome {
                Ok(value) => Slot::Ready(value),
                Err(err) => Slot::Failed(err),
            };
            true
        })
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Trips the cancellation token of an in-flight computation.
    pub(crate) fn kill(&self) {
        self.cancel.cancel();
    }

    // == Wait ==
    /// Waits for the published outcome.
    ///
    /// A killed computation resolves to `Killed` as soon as the token trips,
    /// even if its owner has not noticed yet.
    pub async fn wait(&self) -> Result<V> {
        let mut rx = self.slot.subscribe();
        tokio::select! {
            biased;
            settled = rx.wait_for(Slot::is_settled) => match settled {
                Ok(slot) => slot
                    .outcome()
                    .unwrap_or_else(|| Err(CacheError::Abandoned(self.key.clone()))),
                Err(_) => Err(CacheError::Abandoned(self.key.clone())),
            },
            _ = self.cancel.cancelled() => Err(CacheError::Killed(self.key.clone())),
        }
    }

    /// Waits until an outcome is published, ignoring cancellation.
    pub(crate) async fn settled(&self) {
        let mut rx = self.slot.subscribe();
        let _ = rx.wait_for(Slot::is_settled).await;
    }
}
