//! Keyed exactly-once initialization shared by the process-wide caches
//!
//! Concurrent requesters for the same key await the same in-flight
//! initialization. A failed initialization leaves the key empty so a later
//! call can try again.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;

pub struct OnceMap<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for OnceMap<K, V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> OnceMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn cells(&self) -> MutexGuard<'_, HashMap<K, Arc<OnceCell<V>>>> {
        self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the value for `key`, running `init` only if no other caller
    /// has produced (or is producing) it.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: K, init: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let cell = self.cells().entry(key).or_default().clone();
        cell.get_or_try_init(init).await.cloned()
    }

    /// The already-initialized value, without waiting on in-flight work.
    pub fn get(&self, key: &K) -> Option<V> {
        self.cells().get(key).and_then(|cell| cell.get().cloned())
    }

    pub fn remove(&self, key: &K) -> bool {
        self.cells().remove(key).is_some()
    }

    /// Drop every entry whose key matches the predicate.
    pub fn remove_where(&self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let mut cells = self.cells();
        let before = cells.len();
        cells.retain(|k, _| !pred(k));
        before - cells.len()
    }

    pub fn clear(&self) {
        self.cells().clear();
    }

    /// Snapshot of initialized entries.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.cells()
            .iter()
            .filter_map(|(k, cell)| cell.get().map(|v| (k.clone(), v.clone())))
            .collect()
    }
}
