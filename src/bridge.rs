//! The bridge: one host runtime, one embedded VM, and the shared state
//! between them.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info};

use crate::config::BridgeConfig;
use crate::dynamic::{Dynamic, MemberCache};
use crate::embedder::{Lifecycle, LifecycleState, ProgramImage, VmRuntime};
use crate::error::BridgeError;
use crate::events::{CallbackRegistry, Event};
use crate::handles::HandleRegistry;
use crate::host::HostRuntime;
use crate::logging;
use crate::push::HostCallbacks;

pub struct Bridge<H: HostRuntime, V: VmRuntime> {
    host: H,
    handles: HandleRegistry<H::Object>,
    members: MemberCache<H::Class, H::Member>,
    callbacks: CallbackRegistry,
    push: HostCallbacks,
    lifecycle: Lifecycle<V>,
    service_url: Mutex<Option<String>>,
}

impl<H: HostRuntime, V: VmRuntime> Bridge<H, V> {
    pub fn new(host: H, vm: V) -> Self {
        Self {
            host,
            handles: HandleRegistry::new(),
            members: MemberCache::new(),
            callbacks: CallbackRegistry::new(),
            push: HostCallbacks::new(),
            lifecycle: Lifecycle::new(vm),
            service_url: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn vm(&self) -> &V {
        self.lifecycle.vm()
    }

    pub fn handles(&self) -> &HandleRegistry<H::Object> {
        &self.handles
    }

    pub fn members(&self) -> &MemberCache<H::Class, H::Member> {
        &self.members
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn push(&self) -> &HostCallbacks {
        &self.push
    }

    pub fn lifecycle(&self) -> &Lifecycle<V> {
        &self.lifecycle
    }

    /// Dynamic call surface over this bridge's host, cache and handles.
    pub fn dynamic(&self) -> Dynamic<'_, H> {
        Dynamic::new(&self.host, &self.members, &self.handles)
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.lifecycle.is_initialized()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load configuration for `image`, start the VM and run the program's
    /// entry point.
    pub fn initialize(&self, image: &Path) -> Result<(), BridgeError> {
        let state = self.lifecycle.state();
        if state != LifecycleState::Uninitialized {
            return Err(BridgeError::InvalidState(state));
        }
        let config = BridgeConfig::load_for(image).inspect_err(|_| {
            logging::init(&BridgeConfig::default().log_filter);
        })?;
        logging::init(&config.log_filter);
        self.initialize_with(image, &config)
    }

    /// [`initialize`](Self::initialize) with an explicit configuration.
    pub fn initialize_with(&self, image: &Path, config: &BridgeConfig) -> Result<(), BridgeError> {
        let image = ProgramImage::open(image, config)?;
        info!(
            image = %image.path().display(),
            packages = %image.package_config().display(),
            fingerprint = image.fingerprint(),
            "initializing VM"
        );
        self.lifecycle.initialize(&image, config)?;

        let url = config.service_url();
        if let Some(url) = &url {
            info!("The Dart VM service is listening on {url}");
        }
        *self.service_url_slot() = url;
        Ok(())
    }

    /// Unregister every callback, drop every pinned host reference, then
    /// destroy the isolate and stop the VM.
    ///
    /// `Ok(false)` if nothing was running. Host callbacks stay installed.
    pub fn shutdown(&self) -> Result<bool, BridgeError> {
        let stopped = self.lifecycle.shutdown(|| {
            self.callbacks.clear();
            let cached = self.members.clear();
            let released = self.handles.release_all();
            debug!(cached, released, "host references dropped");
        })?;
        if stopped {
            *self.service_url_slot() = None;
        }
        Ok(stopped)
    }

    pub fn tick(&self) {
        self.lifecycle.tick();
    }

    /// Debug service URL while the VM is running.
    pub fn service_url(&self) -> Option<String> {
        if !self.is_initialized() {
            return None;
        }
        self.service_url_slot().clone()
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Deliver one event to its handler inside the isolate.
    ///
    /// Returns `E::DEFAULT` when the bridge is not running, no handler is
    /// registered, or the handler panicked.
    pub fn dispatch<E: Event>(&self, args: E::Args) -> E::Output {
        if !self.is_initialized() {
            return E::DEFAULT;
        }
        let Some(_entry) = self.lifecycle.enter() else {
            return E::DEFAULT;
        };
        let outcome = self.lifecycle.scoped(|| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.callbacks.dispatch::<E>(args)));
            if E::KIND.drains_microtasks() {
                self.lifecycle.drain_microtasks();
            }
            outcome
        });
        outcome.unwrap_or_else(|_| {
            error!(event = E::KIND.name(), "event handler panicked");
            E::DEFAULT
        })
    }

    fn service_url_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.service_url.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
