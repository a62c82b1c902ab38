//! Concurrency-safe workload registry.
//!
//! Maps a backend name to the live entry tracked for it. One registry exists
//! per workload kind. The registry holds no business logic: callers decide
//! when to start, stop or replace, and the registry only guarantees that each
//! `get`/`put`/`remove` is atomic and that iteration never corrupts the map.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Keyed registry of live workloads of one kind.
#[derive(Debug)]
pub struct WorkloadRegistry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for WorkloadRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> WorkloadRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
        // A panic while holding the lock cannot leave the map half-written:
        // every critical section is a single HashMap call.
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<T>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `entry` under `id`, returning whatever it replaced.
    pub fn put(&self, id: impl Into<String>, entry: Arc<T>) -> Option<Arc<T>> {
        self.write().insert(id.into(), entry)
    }

    /// Unregister `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.write().remove(id)
    }

    /// Unregister `id` only if `predicate` holds for the current entry.
    ///
    /// Lets a caller remove the exact entry it looked at earlier without
    /// clobbering a replacement registered in the meantime.
    pub fn remove_if<F>(&self, id: &str, predicate: F) -> Option<Arc<T>>
    where
        F: FnOnce(&T) -> bool,
    {
        let mut entries = self.write();
        match entries.get(id) {
            Some(current) if predicate(current) => entries.remove(id),
            _ => None,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> Vec<(String, Arc<T>)> {
        self.read()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect()
    }

    /// Currently registered identities.
    pub fn ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Visit every entry of a snapshot until the visitor breaks.
    ///
    /// The lock is released before the first visit, so the visitor may call
    /// back into the registry. Entries added or removed during the walk may
    /// or may not be observed. Order is unspecified.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&str, &Arc<T>) -> ControlFlow<()>,
    {
        for (id, entry) in self.snapshot() {
            if visitor(&id, &entry).is_break() {
                break;
            }
        }
    }
}
