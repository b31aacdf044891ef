//! VM lifecycle: `Uninitialized → Initializing → Running → ShuttingDown →
//! Uninitialized`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, info, warn};

use super::guard::{IsolateEntry, IsolateGuard, IsolateSwitch};
use super::{ProgramImage, VmRuntime};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, VmError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Initializing = 1,
    Running = 2,
    ShuttingDown = 3,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LifecycleState::Initializing,
            2 => LifecycleState::Running,
            3 => LifecycleState::ShuttingDown,
            _ => LifecycleState::Uninitialized,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting down",
        })
    }
}

pub struct Lifecycle<V: VmRuntime> {
    vm: V,
    state: AtomicU8,
    isolate: Mutex<Option<V::Isolate>>,
    guard: IsolateGuard,
}

impl<V: VmRuntime> Lifecycle<V> {
    pub fn new(vm: V) -> Self {
        Self {
            vm,
            state: AtomicU8::new(LifecycleState::Uninitialized as u8),
            isolate: Mutex::new(None),
            guard: IsolateGuard::new(),
        }
    }

    pub fn vm(&self) -> &V {
        &self.vm
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn guard(&self) -> &IsolateGuard {
        &self.guard
    }

    /// Start the VM, load `image` and run its entry point to completion.
    ///
    /// Any failure rolls back whatever was brought up and leaves the state
    /// `Uninitialized`.
    pub fn initialize(&self, image: &ProgramImage, config: &BridgeConfig) -> Result<(), BridgeError> {
        self.transition(LifecycleState::Uninitialized, LifecycleState::Initializing)?;
        match self.boot(image, config) {
            Ok(isolate) => {
                *self.isolate_slot() = Some(isolate);
                self.state.store(LifecycleState::Running as u8, Ordering::Release);
                info!(image = %image.path().display(), "VM running");
                Ok(())
            }
            Err(err) => {
                self.state.store(LifecycleState::Uninitialized as u8, Ordering::Release);
                error!(%err, "VM initialization failed");
                Err(err.into())
            }
        }
    }

    fn boot(&self, image: &ProgramImage, config: &BridgeConfig) -> Result<V::Isolate, VmError> {
        self.vm.start(config)?;
        let isolate = match self.vm.load_image(image) {
            Ok(isolate) => isolate,
            Err(err) => {
                self.vm.stop();
                return Err(err);
            }
        };
        if let Err(err) = self.run_entry_point(isolate, &config.entry_point) {
            self.vm.shutdown_isolate(isolate);
            self.vm.stop();
            return Err(err);
        }
        Ok(isolate)
    }

    fn run_entry_point(&self, isolate: V::Isolate, name: &str) -> Result<(), VmError> {
        self.vm.enter_isolate(isolate)?;
        self.vm.enter_scope();
        let result = self.vm.invoke_entry_point(name).and_then(|()| self.vm.drain_microtasks());
        self.vm.exit_scope();
        self.vm.exit_isolate();
        result
    }

    /// Tear everything down. `teardown` runs first, before the isolate is
    /// destroyed, to drop callbacks and pinned references.
    ///
    /// Returns `Ok(false)` when there was nothing running.
    pub fn shutdown(&self, teardown: impl FnOnce()) -> Result<bool, BridgeError> {
        if self.guard.held_by_current_thread() {
            error!("shutdown requested from inside the isolate; ignoring");
            return Err(BridgeError::ShutdownFromIsolate);
        }
        if self
            .transition(LifecycleState::Running, LifecycleState::ShuttingDown)
            .is_err()
        {
            return Ok(false);
        }

        teardown();

        {
            let _gate = self.guard.lock_exclusive();
            let isolate = self.isolate_slot().take();
            if let Some(isolate) = isolate {
                self.vm.shutdown_isolate(isolate);
            }
        }
        self.vm.stop();
        self.state.store(LifecycleState::Uninitialized as u8, Ordering::Release);
        info!("VM shut down");
        Ok(true)
    }

    /// Enter the isolate through the guard, or `None` if it is gone.
    pub fn enter(&self) -> Option<IsolateEntry<'_>> {
        self.guard.enter(self)
    }

    /// Run `f` inside a VM handle scope.
    pub fn scoped<R>(&self, f: impl FnOnce() -> R) -> R {
        self.vm.enter_scope();
        let result = f();
        self.vm.exit_scope();
        result
    }

    /// Drain the isolate's microtask queue. Caller must be inside the isolate.
    pub fn drain_microtasks(&self) {
        if let Err(err) = self.vm.drain_microtasks() {
            warn!(%err, "microtask drain failed");
        }
    }

    /// Give pending asynchronous work a chance to run. No-op unless running.
    pub fn tick(&self) {
        if !self.is_initialized() {
            return;
        }
        let Some(_entry) = self.enter() else {
            return;
        };
        self.scoped(|| self.drain_microtasks());
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), BridgeError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| BridgeError::InvalidState(LifecycleState::from_u8(actual)))
    }

    fn isolate_slot(&self) -> MutexGuard<'_, Option<V::Isolate>> {
        self.isolate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: VmRuntime> IsolateSwitch for Lifecycle<V> {
    fn enter(&self) -> bool {
        // Read under the gate: shutdown takes the gate before clearing the slot.
        let isolate = *self.isolate_slot();
        match isolate {
            Some(isolate) => match self.vm.enter_isolate(isolate) {
                Ok(()) => true,
                Err(err) => {
                    error!(%err, "isolate enter failed");
                    false
                }
            },
            None => false,
        }
    }

    fn exit(&self) {
        self.vm.exit_isolate();
    }
}
