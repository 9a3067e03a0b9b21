//! Per-key execution coalescing.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// Coalesces concurrent calls for the same key into one execution.
///
/// The first caller for a key becomes the leader and runs the closure;
/// callers arriving while the leader is still running await the same result.
/// Once the call completes the key is retired, so a later call computes
/// fresh. If the leader is canceled mid-flight, one of the waiters takes
/// over the computation.
#[derive(Debug)]
pub(crate) struct Group<K, V> {
    calls: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Group<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `init` under the key, or awaits an in-flight execution of it.
    pub(crate) async fn run<F, Fut>(&self, key: K, init: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = {
            let mut calls = self.calls.lock();
            Arc::clone(calls.entry(key.clone()).or_default())
        };

        let value = cell.get_or_init(init).await.clone();

        // Retire the key, but only if a newer generation has not replaced it.
        let mut calls = self.calls.lock();
        if let Some(current) = calls.get(&key) {
            if Arc::ptr_eq(current, &cell) {
                calls.remove(&key);
            }
        }

        value
    }
}

impl<K, V> Default for Group<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}
