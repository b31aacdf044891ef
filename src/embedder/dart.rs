//! Dart VM backend over the `dart_dll` embedding library.
//!
//! The library is opened lazily on the first `start` and stays loaded for
//! the life of the process; the VM does not support being unloaded.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::path::Path;
use std::ptr;
use std::sync::OnceLock;

use libloading::Library;
use tracing::{debug, info};

use super::{ProgramImage, VmRuntime};
use crate::config::BridgeConfig;
use crate::error::VmError;

type DartHandle = *mut c_void;

#[repr(C)]
struct DartDllConfig {
    start_service_isolate: bool,
    service_port: c_int,
}

// ============================================================================
// Symbol table
// ============================================================================

struct DartApi {
    _lib: Library,
    initialize: unsafe extern "C" fn(*const DartDllConfig) -> bool,
    load_script: unsafe extern "C" fn(*const c_char, *const c_char, *mut c_void) -> *mut c_void,
    drain_microtask_queue: unsafe extern "C" fn() -> DartHandle,
    shutdown: unsafe extern "C" fn(),
    enter_isolate: unsafe extern "C" fn(*mut c_void),
    exit_isolate: unsafe extern "C" fn(),
    shutdown_isolate: unsafe extern "C" fn(),
    enter_scope: unsafe extern "C" fn(),
    exit_scope: unsafe extern "C" fn(),
    root_library: unsafe extern "C" fn() -> DartHandle,
    is_error: unsafe extern "C" fn(DartHandle) -> bool,
    get_error: unsafe extern "C" fn(DartHandle) -> *const c_char,
    new_string: unsafe extern "C" fn(*const c_char) -> DartHandle,
    invoke: unsafe extern "C" fn(DartHandle, DartHandle, c_int, *mut DartHandle) -> DartHandle,
}

fn symbol<T: Copy>(lib: &Library, name: &'static str) -> Result<T, VmError> {
    let mut bytes = Vec::with_capacity(name.len() + 1);
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(0);
    // SAFETY: every `T` used below is the documented C signature of `name`.
    unsafe {
        lib.get::<T>(&bytes)
            .map(|sym| *sym)
            .map_err(|source| VmError::MissingSymbol { symbol: name, source })
    }
}

impl DartApi {
    fn open(path: &Path) -> Result<Self, VmError> {
        let library_error = |source| VmError::Library {
            path: path.to_path_buf(),
            source,
        };

        // RTLD_GLOBAL so the VM's own symbols are visible to native extensions
        // loaded by the program.
        #[cfg(unix)]
        let lib = unsafe {
            let flags = libloading::os::unix::RTLD_NOW | libloading::os::unix::RTLD_GLOBAL;
            libloading::os::unix::Library::open(Some(path), flags)
                .map(Library::from)
                .map_err(library_error)?
        };
        #[cfg(not(unix))]
        let lib = unsafe { Library::new(path).map_err(library_error)? };

        Ok(Self {
            initialize: symbol(&lib, "DartDll_Initialize")?,
            load_script: symbol(&lib, "DartDll_LoadScript")?,
            drain_microtask_queue: symbol(&lib, "DartDll_DrainMicrotaskQueue")?,
            shutdown: symbol(&lib, "DartDll_Shutdown")?,
            enter_isolate: symbol(&lib, "Dart_EnterIsolate")?,
            exit_isolate: symbol(&lib, "Dart_ExitIsolate")?,
            shutdown_isolate: symbol(&lib, "Dart_ShutdownIsolate")?,
            enter_scope: symbol(&lib, "Dart_EnterScope")?,
            exit_scope: symbol(&lib, "Dart_ExitScope")?,
            root_library: symbol(&lib, "Dart_RootLibrary")?,
            is_error: symbol(&lib, "Dart_IsError")?,
            get_error: symbol(&lib, "Dart_GetError")?,
            new_string: symbol(&lib, "Dart_NewStringFromCString")?,
            invoke: symbol(&lib, "Dart_Invoke")?,
            _lib: lib,
        })
    }

    /// `Some(message)` if `handle` is an error handle.
    unsafe fn error_of(&self, handle: DartHandle) -> Option<String> {
        unsafe {
            if !(self.is_error)(handle) {
                return None;
            }
            let message = (self.get_error)(handle);
            if message.is_null() {
                return Some(String::from("unknown error"));
            }
            Some(CStr::from_ptr(message).to_string_lossy().into_owned())
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Raw isolate pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DartIsolate(*mut c_void);

// SAFETY: the pointer is an opaque token; it is only dereferenced by the VM,
// and only by the thread that holds the isolate guard.
unsafe impl Send for DartIsolate {}
unsafe impl Sync for DartIsolate {}

#[derive(Default)]
pub struct DartVm {
    api: OnceLock<DartApi>,
}

impl DartVm {
    pub const fn new() -> Self {
        Self { api: OnceLock::new() }
    }

    fn api(&self) -> Result<&DartApi, VmError> {
        self.api.get().ok_or(VmError::NotLoaded)
    }

    fn load(&self, path: &Path) -> Result<&DartApi, VmError> {
        if let Some(api) = self.api.get() {
            return Ok(api);
        }
        let api = DartApi::open(path)?;
        info!(library = %path.display(), "VM library loaded");
        // A concurrent loser just drops its handle; the library refcount
        // keeps the winner valid.
        Ok(self.api.get_or_init(|| api))
    }
}

fn c_path(path: &Path) -> Result<CString, VmError> {
    CString::new(path.to_string_lossy().into_owned()).map_err(|_| VmError::ImageLoad {
        path: path.to_path_buf(),
        reason: "path contains a NUL byte".into(),
    })
}

impl VmRuntime for DartVm {
    type Isolate = DartIsolate;

    fn start(&self, config: &BridgeConfig) -> Result<(), VmError> {
        let api = self.load(&config.vm_library)?;
        let dll_config = DartDllConfig {
            start_service_isolate: config.start_service_isolate,
            service_port: c_int::from(config.service_port),
        };
        // SAFETY: `dll_config` outlives the call.
        if unsafe { (api.initialize)(&dll_config) } {
            debug!(service = config.start_service_isolate, port = config.service_port, "VM started");
            Ok(())
        } else {
            Err(VmError::StartFailed)
        }
    }

    fn load_image(&self, image: &ProgramImage) -> Result<DartIsolate, VmError> {
        let api = self.api()?;
        let script = c_path(image.path())?;
        let packages = c_path(image.package_config())?;
        // SAFETY: both strings are NUL-terminated and live across the call.
        let isolate = unsafe { (api.load_script)(script.as_ptr(), packages.as_ptr(), ptr::null_mut()) };
        if isolate.is_null() {
            return Err(VmError::ImageLoad {
                path: image.path().to_path_buf(),
                reason: "the VM returned no isolate".into(),
            });
        }
        Ok(DartIsolate(isolate))
    }

    fn enter_isolate(&self, isolate: DartIsolate) -> Result<(), VmError> {
        let api = self.api()?;
        if isolate.0.is_null() {
            return Err(VmError::EnterFailed("null isolate".into()));
        }
        unsafe { (api.enter_isolate)(isolate.0) };
        Ok(())
    }

    fn exit_isolate(&self) {
        if let Ok(api) = self.api() {
            unsafe { (api.exit_isolate)() };
        }
    }

    fn enter_scope(&self) {
        if let Ok(api) = self.api() {
            unsafe { (api.enter_scope)() };
        }
    }

    fn exit_scope(&self) {
        if let Ok(api) = self.api() {
            unsafe { (api.exit_scope)() };
        }
    }

    fn invoke_entry_point(&self, name: &str) -> Result<(), VmError> {
        let api = self.api()?;
        let c_name = CString::new(name).map_err(|_| VmError::EntryPointMissing(name.to_owned()))?;
        // SAFETY: caller is inside the isolate with a scope open.
        unsafe {
            let library = (api.root_library)();
            if let Some(message) = api.error_of(library) {
                return Err(VmError::EntryPointFailed {
                    name: name.to_owned(),
                    message: format!("no root library: {message}"),
                });
            }
            let result = (api.invoke)(library, (api.new_string)(c_name.as_ptr()), 0, ptr::null_mut());
            match api.error_of(result) {
                None => Ok(()),
                Some(message) if message.contains("NoSuchMethodError") => {
                    Err(VmError::EntryPointMissing(name.to_owned()))
                }
                Some(message) => Err(VmError::EntryPointFailed {
                    name: name.to_owned(),
                    message,
                }),
            }
        }
    }

    fn drain_microtasks(&self) -> Result<(), VmError> {
        let api = self.api()?;
        // SAFETY: caller is inside the isolate.
        unsafe {
            let result = (api.drain_microtask_queue)();
            if result.is_null() {
                return Ok(());
            }
            match api.error_of(result) {
                Some(message) => Err(VmError::Microtask(message)),
                None => Ok(()),
            }
        }
    }

    fn shutdown_isolate(&self, isolate: DartIsolate) {
        let Ok(api) = self.api() else {
            return;
        };
        // Dart_ShutdownIsolate acts on the current isolate.
        unsafe {
            (api.enter_isolate)(isolate.0);
            (api.shutdown_isolate)();
        }
    }

    fn stop(&self) {
        let Ok(api) = self.api() else {
            return;
        };
        unsafe { (api.shutdown)() };
        debug!("VM stopped");
    }
}
