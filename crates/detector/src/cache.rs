//! Per-run memoizing cache with single-flight semantics.
//!
//! Every key maps to one shared future. The first caller for a key creates it,
//! every later caller awaits a clone of the same future, so the computation
//! runs once no matter how many probes ask for the key concurrently. Failures
//! are cached exactly like values and are not retried within a run.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    hash::Hash,
    sync::{Mutex, PoisonError},
};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::CheckError;

type SharedOutcome<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

pub struct Cache<K, V, E = CheckError> {
    entries: Mutex<HashMap<K, SharedOutcome<V, E>>>,
}

impl<K, V, E> Cache<K, V, E>
where
    K: Hash + Eq,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Return the outcome for `key`, running `compute` only if no caller has
    /// claimed the key yet.
    ///
    /// The future built by `compute` is claimed under the lock; if another
    /// caller claimed the key in the meantime, it is dropped without being
    /// polled and the claimed one is awaited instead.
    pub async fn get<F, Fut>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(outcome) = self.claimed(&key) {
            return outcome.await;
        }

        let fresh = compute().boxed().shared();
        let outcome = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.entry(key).or_insert(fresh).clone()
        };
        outcome.await
    }

    fn claimed(&self, key: &K) -> Option<SharedOutcome<V, E>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    /// Whether a computation for `key` was already claimed
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, E> Default for Cache<K, V, E>
where
    K: Hash + Eq,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> fmt::Debug for Cache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("Cache").field("entries", &entries).finish()
    }
}
