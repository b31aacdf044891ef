//! Lifecycle exports for native hosts and the Java mod.

use std::ffi::{CString, c_char};
use std::path::Path;
use std::sync::Arc;

use tracing::{error, warn};

use super::abi::{self, Word};
use super::global::bridge;
use crate::dynamic::{MemberKind, ValueKind};

/// Java class owning the native methods and the chat callback.
pub const BRIDGE_CLASS: &str = "com/redstone/DartBridge";
const CHAT_METHOD: &str = "onChatMessage";
const CHAT_SIGNATURE: &str = "(JLjava/lang/String;)V";

fn initialize_at(path: &Path) -> bool {
    match bridge().initialize(path) {
        Ok(()) => true,
        Err(err) => {
            error!(%err, image = %path.display(), "bridge initialization failed");
            false
        }
    }
}

fn shutdown() {
    if let Err(err) = bridge().shutdown() {
        error!(%err, "bridge shutdown refused");
    }
}

/// Route chat pushes to the static `onChatMessage(long, String)`.
///
/// Resolves the method from the calling thread so that the class is found
/// through the mod's class loader.
fn install_chat_sink() -> bool {
    let dynamic = bridge().dynamic();
    if let Err(err) = dynamic.preload(BRIDGE_CLASS, CHAT_METHOD, CHAT_SIGNATURE, MemberKind::StaticMethod) {
        error!(%err, "chat callback unavailable");
        return false;
    }
    bridge().push().set_send_chat(Some(Arc::new(|player_id: i64, message: &str| {
        let Ok(text) = CString::new(message) else {
            warn!(player_id, "chat message contains NUL; dropped");
            return;
        };
        bridge().dynamic().call_static_method(
            BRIDGE_CLASS,
            CHAT_METHOD,
            CHAT_SIGNATURE,
            ValueKind::Void,
            &[Word::from_i64(player_id), Word::from_ptr(text.as_ptr())],
        );
    })));
    true
}

// =========================================================================
// C entry points
// =========================================================================

/// Start the VM with the program at `script_path`. Returns false if the
/// bridge is already running or any initialization step fails.
#[unsafe(no_mangle)]
pub extern "C" fn dart_bridge_init(script_path: *const c_char) -> bool {
    // SAFETY: the caller passes a NUL-terminated path for the call's duration.
    match unsafe { abi::read_c_string(script_path) } {
        Some(path) => initialize_at(Path::new(&path)),
        None => {
            error!("dart_bridge_init called with a null path");
            false
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn dart_bridge_shutdown() {
    shutdown();
}

/// Drain pending microtasks. Call once per host frame.
#[unsafe(no_mangle)]
pub extern "C" fn dart_bridge_tick() {
    bridge().tick();
}

#[unsafe(no_mangle)]
pub extern "C" fn dart_bridge_is_initialized() -> bool {
    bridge().is_initialized()
}

/// The debug service URL as an owned string (free with `jni_free_string`),
/// or null when not running or the service isolate is disabled.
#[unsafe(no_mangle)]
pub extern "C" fn dart_bridge_get_service_url() -> *mut c_char {
    match bridge().service_url() {
        Some(url) => abi::alloc_c_string(&url),
        None => std::ptr::null_mut(),
    }
}

/// Hand the bridge a JVM when it is not loaded through `System.loadLibrary`.
///
/// # Safety
///
/// `vm` must be null or a valid `JavaVM*` for the life of the process.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dart_bridge_set_jvm(vm: *mut jni::sys::JavaVM) -> bool {
    match unsafe { jni::JavaVM::from_raw(vm) } {
        Ok(vm) => bridge().host().attach_vm(vm),
        Err(err) => {
            error!(%err, "invalid JavaVM pointer");
            false
        }
    }
}

// =========================================================================
// JNI entry points
// =========================================================================

#[cfg(feature = "jni_exports")]
mod jni_exports {
    use std::ffi::c_void;
    use std::path::Path;

    use jni::objects::{JClass, JString};
    use jni::sys::{JNI_FALSE, JNI_TRUE, JNI_VERSION_1_8, jboolean, jint, jstring};
    use jni::{JNIEnv, JavaVM};
    use tracing::error;

    use super::{bridge, initialize_at, install_chat_sink, shutdown};

    fn capture_vm(env: &JNIEnv<'_>) {
        match env.get_java_vm() {
            Ok(vm) => {
                bridge().host().attach_vm(vm);
            }
            Err(err) => error!(%err, "could not obtain the JavaVM"),
        }
    }

    #[unsafe(no_mangle)]
    pub extern "system" fn JNI_OnLoad(vm: JavaVM, _reserved: *mut c_void) -> jint {
        bridge().host().attach_vm(vm);
        JNI_VERSION_1_8
    }

    #[unsafe(no_mangle)]
    pub extern "system" fn Java_com_redstone_DartBridge_init<'local>(
        mut env: JNIEnv<'local>,
        _class: JClass<'local>,
        script_path: JString<'local>,
    ) -> jboolean {
        capture_vm(&env);
        let path: String = match env.get_string(&script_path) {
            Ok(path) => path.into(),
            Err(err) => {
                error!(%err, "init called without a readable script path");
                return JNI_FALSE;
            }
        };
        if initialize_at(Path::new(&path)) { JNI_TRUE } else { JNI_FALSE }
    }

    #[unsafe(no_mangle)]
    pub extern "system" fn Java_com_redstone_DartBridge_shutdown<'local>(_env: JNIEnv<'local>, _class: JClass<'local>) {
        shutdown();
    }

    #[unsafe(no_mangle)]
    pub extern "system" fn Java_com_redstone_DartBridge_tick<'local>(_env: JNIEnv<'local>, _class: JClass<'local>) {
        bridge().tick();
    }

    #[unsafe(no_mangle)]
    pub extern "system" fn Java_com_redstone_DartBridge_setSendChatCallback<'local>(
        env: JNIEnv<'local>,
        _class: JClass<'local>,
    ) {
        capture_vm(&env);
        install_chat_sink();
    }

    #[unsafe(no_mangle)]
    pub extern "system" fn Java_com_redstone_DartBridge_getDartServiceUrl<'local>(
        env: JNIEnv<'local>,
        _class: JClass<'local>,
    ) -> jstring {
        let Some(url) = bridge().service_url() else {
            return std::ptr::null_mut();
        };
        match env.new_string(url) {
            Ok(url) => url.into_raw(),
            Err(err) => {
                error!(%err, "could not build service URL string");
                std::ptr::null_mut()
            }
        }
    }
}
