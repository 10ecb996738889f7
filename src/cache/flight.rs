//! Single-flight bookkeeping
//!
//! Tracks which entries the current task is computing so that a factory
//! resolving its own key fails fast instead of waiting on itself.

use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    /// Identities of the entries whose factories enclose the running code.
    static RESOLUTION_CHAIN: Vec<usize>;
}

/// Stable identity of an entry for as long as someone holds it.
pub(crate) fn entry_id<T>(entry: &Arc<T>) -> usize {
    Arc::as_ptr(entry) as *const () as usize
}

/// True when the running task is inside the factory of `entry`.
pub(crate) fn is_computing_on_this_task<T>(entry: &Arc<T>) -> bool {
    let id = entry_id(entry);
    RESOLUTION_CHAIN
        .try_with(|chain| chain.contains(&id))
        .unwrap_or(false)
}

/// Runs `fut` with `entry` pushed onto the task's resolution chain.
pub(crate) async fn within_chain<T, F: Future>(entry: &Arc<T>, fut: F) -> F::Output {
    let mut chain = RESOLUTION_CHAIN
        .try_with(|chain| chain.clone())
        .unwrap_or_default();
    chain.push(entry_id(entry));
    RESOLUTION_CHAIN.scope(chain, fut).await
}
