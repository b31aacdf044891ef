//! Scripted in-memory VM for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{ProgramImage, VmRuntime};
use crate::config::BridgeConfig;
use crate::error::VmError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VmCall {
    Start,
    LoadImage,
    Enter,
    Exit,
    EnterScope,
    ExitScope,
    InvokeEntryPoint(String),
    Drain,
    ShutdownIsolate,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailAt {
    Start,
    LoadImage,
    EntryPoint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FakeIsolate(pub u32);

type EntryScript = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

#[derive(Default)]
pub struct FakeVm {
    calls: Mutex<Vec<VmCall>>,
    fail_at: Mutex<Option<FailAt>>,
    entry_point: Mutex<Option<EntryScript>>,
    inside: AtomicUsize,
    isolates: AtomicUsize,
}

impl FakeVm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_at(&self, stage: FailAt) {
        *self.fail_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(stage);
    }

    /// Stop failing at the stage set by [`fail_at`](Self::fail_at).
    pub fn recover(&self) {
        *self.fail_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Run `script` as the program's entry point.
    pub fn on_entry_point(&self, script: impl Fn() -> Result<(), String> + Send + Sync + 'static) {
        *self.entry_point.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(script));
    }

    pub fn calls(&self) -> Vec<VmCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn count(&self, call: &VmCall) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| *c == call)
            .count()
    }

    /// Threads currently between `Enter` and `Exit`.
    pub fn inside(&self) -> usize {
        self.inside.load(Ordering::SeqCst)
    }

    fn record(&self, call: VmCall) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    fn fails(&self, stage: FailAt) -> bool {
        *self.fail_at.lock().unwrap_or_else(PoisonError::into_inner) == Some(stage)
    }
}

impl VmRuntime for FakeVm {
    type Isolate = FakeIsolate;

    fn start(&self, _config: &BridgeConfig) -> Result<(), VmError> {
        self.record(VmCall::Start);
        if self.fails(FailAt::Start) {
            return Err(VmError::StartFailed);
        }
        Ok(())
    }

    fn load_image(&self, image: &ProgramImage) -> Result<FakeIsolate, VmError> {
        self.record(VmCall::LoadImage);
        if self.fails(FailAt::LoadImage) {
            return Err(VmError::ImageLoad {
                path: image.path().to_path_buf(),
                reason: "scripted failure".into(),
            });
        }
        let id = self.isolates.fetch_add(1, Ordering::SeqCst) as u32;
        Ok(FakeIsolate(id))
    }

    fn enter_isolate(&self, _isolate: FakeIsolate) -> Result<(), VmError> {
        self.record(VmCall::Enter);
        let was = self.inside.fetch_add(1, Ordering::SeqCst);
        assert_eq!(was, 0, "isolate entered while another thread is inside");
        Ok(())
    }

    fn exit_isolate(&self) {
        self.record(VmCall::Exit);
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    fn enter_scope(&self) {
        self.record(VmCall::EnterScope);
    }

    fn exit_scope(&self) {
        self.record(VmCall::ExitScope);
    }

    fn invoke_entry_point(&self, name: &str) -> Result<(), VmError> {
        self.record(VmCall::InvokeEntryPoint(name.to_owned()));
        if self.fails(FailAt::EntryPoint) {
            return Err(VmError::EntryPointMissing(name.to_owned()));
        }
        let script = self.entry_point.lock().unwrap_or_else(PoisonError::into_inner);
        match script.as_ref() {
            Some(script) => script().map_err(|message| VmError::EntryPointFailed {
                name: name.to_owned(),
                message,
            }),
            None => Ok(()),
        }
    }

    fn drain_microtasks(&self) -> Result<(), VmError> {
        self.record(VmCall::Drain);
        Ok(())
    }

    fn shutdown_isolate(&self, _isolate: FakeIsolate) {
        self.record(VmCall::ShutdownIsolate);
    }

    fn stop(&self) {
        self.record(VmCall::Stop);
    }
}
