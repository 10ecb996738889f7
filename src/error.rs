//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// Errors are `Clone` because a single failed computation is reported to
/// every caller that was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The factory for a key resolved that same key while it was in flight
    #[error("Recursive resolve of key: {0}")]
    RecursiveResolve(String),

    /// The factory returned an error
    #[error("Factory failed for key {key}: {cause:#}")]
    Factory {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    /// The computation was cancelled through `remove_and_kill`
    #[error("Computation killed for key: {0}")]
    Killed(String),

    /// The factory did not observe cancellation within the kill grace period
    #[error("Cancellation not honored for key: {0}")]
    CancellationUnsupported(String),

    /// The computing caller went away before publishing an outcome
    #[error("Computation abandoned for key: {0}")]
    Abandoned(String),
}

impl CacheError {
    // == Factory Constructor ==
    /// Wraps a factory error for `key`.
    ///
    /// A recursion fault raised by a nested resolve passes through unchanged
    /// so the outermost caller sees `RecursiveResolve`, not a factory error.
    pub(crate) fn from_factory(key: &str, err: anyhow::Error) -> Self {
        match err.downcast::<CacheError>() {
            Ok(CacheError::RecursiveResolve(inner)) => CacheError::RecursiveResolve(inner),
            Ok(other) => CacheError::Factory {
                key: key.to_string(),
                cause: Arc::new(anyhow::Error::new(other)),
            },
            Err(err) => CacheError::Factory {
                key: key.to_string(),
                cause: Arc::new(err),
            },
        }
    }

    // == Factory Error Accessor ==
    /// Returns the original factory error, if this is a factory failure.
    pub fn factory_error(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::Factory { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }

    // == Key Accessor ==
    /// Returns the key this error refers to.
    pub fn key(&self) -> &str {
        match self {
            CacheError::NotFound(key)
            | CacheError::RecursiveResolve(key)
            | CacheError::Killed(key)
            | CacheError::CancellationUnsupported(key)
            | CacheError::Abandoned(key) => key,
            CacheError::Factory { key, .. } => key,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
