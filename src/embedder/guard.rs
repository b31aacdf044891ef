//! Reentrant single-thread access to the isolate.
//!
//! The first [`IsolateGuard::enter`] on a thread takes the gate mutex and
//! performs the real isolate enter; nested calls from the same thread only
//! bump a depth counter. The matching outer [`IsolateEntry`] drop performs
//! the isolate exit and releases the gate.
//!
//! There is no acquisition timeout. A handler that never returns keeps the
//! gate held and blocks every other dispatching thread.

use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::error;

/// The actual isolate enter/exit primitive.
pub trait IsolateSwitch {
    /// Make the isolate current on this thread. `false` means there is
    /// nothing to enter (e.g. it was shut down) and the entry is abandoned.
    fn enter(&self) -> bool;

    fn exit(&self);
}

#[derive(Default)]
struct Ownership {
    thread: Option<ThreadId>,
    depth: usize,
}

#[derive(Default)]
pub struct IsolateGuard {
    gate: Mutex<()>,
    owner: Mutex<Ownership>,
}

/// Proof that the current thread is inside the isolate.
///
/// Not `Send`: it must be dropped on the thread that created it.
#[must_use = "the isolate is exited as soon as the entry is dropped"]
pub struct IsolateEntry<'g> {
    guard: &'g IsolateGuard,
    switch: &'g dyn IsolateSwitch,
    /// `Some` only for the outer entry that took the gate.
    gate: Option<MutexGuard<'g, ()>>,
    _not_send: PhantomData<*const ()>,
}

impl IsolateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter<'g>(&'g self, switch: &'g dyn IsolateSwitch) -> Option<IsolateEntry<'g>> {
        let me = thread::current().id();
        {
            let mut owner = self.ownership();
            if owner.thread == Some(me) && owner.depth > 0 {
                owner.depth += 1;
                return Some(IsolateEntry {
                    guard: self,
                    switch,
                    gate: None,
                    _not_send: PhantomData,
                });
            }
        }

        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !switch.enter() {
            return None;
        }
        let mut owner = self.ownership();
        owner.thread = Some(me);
        owner.depth = 1;
        drop(owner);
        Some(IsolateEntry {
            guard: self,
            switch,
            gate: Some(gate),
            _not_send: PhantomData,
        })
    }

    /// Take the gate without entering, for teardown.
    ///
    /// Returns `None` when the current thread is already inside, since
    /// waiting would deadlock.
    pub fn lock_exclusive(&self) -> Option<MutexGuard<'_, ()>> {
        if self.held_by_current_thread() {
            return None;
        }
        Some(self.gate.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn held_by_current_thread(&self) -> bool {
        let owner = self.ownership();
        owner.depth > 0 && owner.thread == Some(thread::current().id())
    }

    /// Current nesting depth on the owning thread, `0` when free.
    pub fn depth(&self) -> usize {
        self.ownership().depth
    }

    fn ownership(&self) -> MutexGuard<'_, Ownership> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IsolateEntry<'_> {
    /// Whether this entry performed the real isolate enter.
    pub fn is_outer(&self) -> bool {
        self.gate.is_some()
    }
}

impl Drop for IsolateEntry<'_> {
    fn drop(&mut self) {
        let me = thread::current().id();
        let mut owner = self.guard.ownership();
        if owner.thread != Some(me) {
            error!(
                owner = ?owner.thread,
                current = ?me,
                "isolate guard released by a thread that does not own it"
            );
        }
        if self.gate.is_none() {
            owner.depth = owner.depth.saturating_sub(1);
            return;
        }
        drop(owner);
        self.switch.exit();
        let mut owner = self.guard.ownership();
        owner.thread = None;
        owner.depth = 0;
        drop(owner);
        self.gate.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSwitch {
        enters: AtomicUsize,
        exits: AtomicUsize,
        inside: AtomicUsize,
        refuse: AtomicBool,
    }

    impl IsolateSwitch for CountingSwitch {
        fn enter(&self) -> bool {
            if self.refuse.load(Ordering::SeqCst) {
                return false;
            }
            self.enters.fetch_add(1, Ordering::SeqCst);
            let was = self.inside.fetch_add(1, Ordering::SeqCst);
            assert_eq!(was, 0, "two threads inside the isolate");
            true
        }

        fn exit(&self) {
            self.exits.fetch_add(1, Ordering::SeqCst);
            self.inside.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_reentry_enters_once() {
        let guard = IsolateGuard::new();
        let switch = CountingSwitch::default();
        {
            let outer = guard.enter(&switch).unwrap();
            assert!(outer.is_outer());
            {
                let inner = guard.enter(&switch).unwrap();
                assert!(!inner.is_outer());
                let innermost = guard.enter(&switch).unwrap();
                assert_eq!(guard.depth(), 3);
                drop(innermost);
            }
            assert_eq!(guard.depth(), 1);
            assert_eq!(switch.exits.load(Ordering::SeqCst), 0);
        }
        assert_eq!(switch.enters.load(Ordering::SeqCst), 1);
        assert_eq!(switch.exits.load(Ordering::SeqCst), 1);
        assert_eq!(guard.depth(), 0);
        assert!(!guard.held_by_current_thread());
    }

    #[test]
    fn test_refused_enter_releases_gate() {
        let guard = IsolateGuard::new();
        let switch = CountingSwitch::default();
        switch.refuse.store(true, Ordering::SeqCst);
        assert!(guard.enter(&switch).is_none());
        assert!(guard.lock_exclusive().is_some());
        switch.refuse.store(false, Ordering::SeqCst);
        assert!(guard.enter(&switch).is_some());
    }

    #[test]
    fn test_lock_exclusive_refused_while_inside() {
        let guard = IsolateGuard::new();
        let switch = CountingSwitch::default();
        let _entry = guard.enter(&switch).unwrap();
        assert!(guard.held_by_current_thread());
        assert!(guard.lock_exclusive().is_none());
    }

    #[test]
    fn test_mutual_exclusion() {
        let guard = Arc::new(IsolateGuard::new());
        let switch = Arc::new(CountingSwitch::default());
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..6)
            .map(|_| {
                let guard = guard.clone();
                let switch = switch.clone();
                let peak = peak.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        let entry = guard.enter(&*switch).unwrap();
                        let now = switch.inside.load(Ordering::SeqCst);
                        peak.fetch_max(now, Ordering::SeqCst);
                        if i % 3 == 0 {
                            let nested = guard.enter(&*switch).unwrap();
                            assert_eq!(switch.inside.load(Ordering::SeqCst), 1);
                            drop(nested);
                        }
                        if fastrand::u8(..8) == 0 {
                            thread::sleep(Duration::from_micros(fastrand::u64(..50)));
                        }
                        drop(entry);
                        if fastrand::bool() {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(switch.enters.load(Ordering::SeqCst), 1200);
        assert_eq!(switch.exits.load(Ordering::SeqCst), 1200);
    }
}
