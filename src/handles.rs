//! Handle registry: opaque 64-bit handles for pinned host objects.
//!
//! A handle is present in the table exactly as long as its object is pinned.
//! `T` is the pinned reference itself (a JNI global ref in production), so
//! dropping the table entry is what un-pins the object.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::runtime::abi::Handle;

/// Distinct unknown handles remembered for once-only warnings.
const REPORTED_LIMIT: usize = 1024;

pub struct HandleRegistry<T> {
    next: AtomicI64,
    table: Mutex<HashMap<Handle, T>>,
    /// Unknown non-zero handles already reported, so each is logged once.
    reported: Mutex<HashSet<Handle>>,
}

impl<T: Clone> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
            table: Mutex::new(HashMap::new()),
            reported: Mutex::new(HashSet::new()),
        }
    }

    /// Insert an already pinned reference and mint a fresh handle for it.
    ///
    /// `None` (a null object) yields [`Handle::NULL`] and inserts nothing.
    pub fn store(&self, object: Option<T>) -> Handle {
        let Some(object) = object else {
            return Handle::NULL;
        };
        let handle = Handle::from_raw(self.next.fetch_add(1, Ordering::Relaxed));
        self.table().insert(handle, object);
        handle
    }

    pub fn get(&self, handle: Handle) -> Option<T> {
        if handle.is_null() {
            return None;
        }
        let found = self.table().get(&handle).cloned();
        if found.is_none() {
            let mut reported = self.reported();
            if reported.len() >= REPORTED_LIMIT && !reported.contains(&handle) {
                reported.clear();
            }
            if reported.insert(handle) {
                warn!(handle = handle.to_raw(), "lookup of unknown handle");
            }
        }
        found
    }

    /// Remove `handle` and un-pin its object. Returns whether it was present.
    pub fn release(&self, handle: Handle) -> bool {
        if handle.is_null() {
            return false;
        }
        // The guard is a temporary of this statement, so the reference is
        // dropped after the table lock is released.
        let removed = self.table().remove(&handle);
        match removed {
            Some(object) => {
                drop(object);
                true
            }
            None => {
                debug!(handle = handle.to_raw(), "release of unknown handle");
                false
            }
        }
    }

    /// Un-pin every outstanding reference. Returns how many were released.
    pub fn release_all(&self) -> usize {
        let drained: Vec<T> = self.table().drain().map(|(_, object)| object).collect();
        let released = drained.len();
        drop(drained);
        self.reported().clear();
        if released > 0 {
            info!(released, "released all outstanding handles");
        }
        released
    }

    pub fn count(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<Handle, T>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reported(&self) -> MutexGuard<'_, HashSet<Handle>> {
        self.reported.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
