//! Dynamic call stubs callable from the VM over FFI.
//!
//! These extern "C" functions let program code reach arbitrary host members
//! without a per-member native binding. They handle:
//! - Object construction
//! - Instance and static method calls
//! - Instance and static field reads and writes
//! - Handle and returned-string release
//!
//! The calling convention is:
//! - Type, member and descriptor names are NUL-terminated UTF-8
//! - Arguments are a `*const i64` buffer of `arg_count` words, one per
//!   declared parameter (see [`Word`] for the per-kind encoding)
//! - Object results are handles; `0` is null
//! - String results are owned by the caller and freed with `jni_free_string`
//!
//! No stub ever reports an error to its caller: every failure logs and
//! returns the zero value of the result kind.

use std::ffi::c_char;

use tracing::warn;

use super::abi::{self, Handle, Word};
use super::global::bridge;
use crate::dynamic::ValueKind;
use crate::error::CallError;

/// Borrow a name argument; `None` if null or not UTF-8.
fn name<'a>(ptr: *const c_char) -> Option<&'a str> {
    // SAFETY: the caller passes NUL-terminated strings that outlive the call.
    unsafe { abi::c_str(ptr) }?.to_str().ok()
}

/// Borrow every name argument of one stub call.
fn names<'a, const N: usize>(ptrs: [*const c_char; N]) -> Result<[&'a str; N], CallError> {
    let mut out = [""; N];
    for (slot, ptr) in out.iter_mut().zip(ptrs) {
        *slot = name(ptr).ok_or(CallError::BadName)?;
    }
    Ok(out)
}

/// Borrow the argument buffer. A null buffer or non-positive count is empty.
fn words<'a>(args: *const i64, arg_count: i32) -> &'a [Word] {
    if args.is_null() || arg_count <= 0 {
        return &[];
    }
    // SAFETY: `Word` is a transparent `i64`; the caller guarantees
    // `arg_count` readable slots.
    unsafe { std::slice::from_raw_parts(args.cast::<Word>(), arg_count as usize) }
}

fn rejected(op: &'static str, err: CallError) -> Word {
    warn!(op, %err, "returning zero value");
    Word::ZERO
}

fn call_instance(
    handle: i64,
    class: *const c_char,
    method: *const c_char,
    sig: *const c_char,
    kind: ValueKind,
    args: *const i64,
    arg_count: i32,
) -> Word {
    let [class, method, sig] = match names([class, method, sig]) {
        Ok(names) => names,
        Err(err) => return rejected("call_method", err),
    };
    bridge()
        .dynamic()
        .call_method(Handle::from_raw(handle), class, method, sig, kind, words(args, arg_count))
}

fn call_static(
    class: *const c_char,
    method: *const c_char,
    sig: *const c_char,
    kind: ValueKind,
    args: *const i64,
    arg_count: i32,
) -> Word {
    let [class, method, sig] = match names([class, method, sig]) {
        Ok(names) => names,
        Err(err) => return rejected("call_static_method", err),
    };
    bridge()
        .dynamic()
        .call_static_method(class, method, sig, kind, words(args, arg_count))
}

fn get_instance(handle: i64, class: *const c_char, field: *const c_char, sig: *const c_char, kind: ValueKind) -> Word {
    let [class, field, sig] = match names([class, field, sig]) {
        Ok(names) => names,
        Err(err) => return rejected("get_field", err),
    };
    bridge().dynamic().get_field(Handle::from_raw(handle), class, field, sig, kind)
}

fn get_static(class: *const c_char, field: *const c_char, sig: *const c_char, kind: ValueKind) -> Word {
    let [class, field, sig] = match names([class, field, sig]) {
        Ok(names) => names,
        Err(err) => return rejected("get_static_field", err),
    };
    bridge().dynamic().get_static_field(class, field, sig, kind)
}

fn set_instance(
    handle: i64,
    class: *const c_char,
    field: *const c_char,
    sig: *const c_char,
    kind: ValueKind,
    value: Word,
) {
    let [class, field, sig] = match names([class, field, sig]) {
        Ok(names) => names,
        Err(err) => {
            rejected("set_field", err);
            return;
        }
    };
    bridge()
        .dynamic()
        .set_field(Handle::from_raw(handle), class, field, sig, kind, value);
}

fn set_static(class: *const c_char, field: *const c_char, sig: *const c_char, kind: ValueKind, value: Word) {
    let [class, field, sig] = match names([class, field, sig]) {
        Ok(names) => names,
        Err(err) => {
            rejected("set_static_field", err);
            return;
        }
    };
    bridge().dynamic().set_static_field(class, field, sig, kind, value);
}

// Word <-> C type conversions not covered by `Word` itself.

fn unit(_: Word) {}

fn handle_bits(word: Word) -> i64 {
    word.as_handle().to_raw()
}

fn handle_word(raw: i64) -> Word {
    Word::from_handle(Handle::from_raw(raw))
}

// =========================================================================
// Construction
// =========================================================================

/// Construct `class_name` with constructor descriptor `ctor_sig` (which must
/// return `V`). Returns a handle, `0` on failure.
#[unsafe(no_mangle)]
pub extern "C" fn jni_create_object(
    class_name: *const c_char,
    ctor_sig: *const c_char,
    args: *const i64,
    arg_count: i32,
) -> i64 {
    let [class, sig] = match names([class_name, ctor_sig]) {
        Ok(names) => names,
        Err(err) => return handle_bits(rejected("create_object", err)),
    };
    bridge()
        .dynamic()
        .create_object(class, sig, words(args, arg_count))
        .to_raw()
}

// =========================================================================
// Method Calls
// =========================================================================

macro_rules! method_stubs {
    ($($instance:ident, $statik:ident: $ret:ty = $kind:ident via $lift:path;)*) => {$(
        #[unsafe(no_mangle)]
        pub extern "C" fn $instance(
            obj_handle: i64,
            class_name: *const c_char,
            method_name: *const c_char,
            sig: *const c_char,
            args: *const i64,
            arg_count: i32,
        ) -> $ret {
            $lift(call_instance(obj_handle, class_name, method_name, sig, ValueKind::$kind, args, arg_count))
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn $statik(
            class_name: *const c_char,
            method_name: *const c_char,
            sig: *const c_char,
            args: *const i64,
            arg_count: i32,
        ) -> $ret {
            $lift(call_static(class_name, method_name, sig, ValueKind::$kind, args, arg_count))
        }
    )*};
}

method_stubs! {
    jni_call_void_method, jni_call_static_void_method: () = Void via unit;
    jni_call_int_method, jni_call_static_int_method: i32 = Int via Word::as_i32;
    jni_call_long_method, jni_call_static_long_method: i64 = Long via Word::as_i64;
    jni_call_double_method, jni_call_static_double_method: f64 = Double via Word::as_f64;
    jni_call_float_method, jni_call_static_float_method: f32 = Float via Word::as_f32;
    jni_call_bool_method, jni_call_static_bool_method: bool = Boolean via Word::as_bool;
    jni_call_object_method, jni_call_static_object_method: i64 = Object via handle_bits;
    jni_call_string_method, jni_call_static_string_method: *const c_char = String via Word::as_ptr;
}

// =========================================================================
// Field Access
// =========================================================================

macro_rules! field_stubs {
    ($(
        $get:ident, $get_static:ident, $set:ident, $set_static:ident:
            $ty:ty = $kind:ident via $lift:path, $lower:path;
    )*) => {$(
        #[unsafe(no_mangle)]
        pub extern "C" fn $get(
            obj_handle: i64,
            class_name: *const c_char,
            field_name: *const c_char,
            sig: *const c_char,
        ) -> $ty {
            $lift(get_instance(obj_handle, class_name, field_name, sig, ValueKind::$kind))
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn $get_static(class_name: *const c_char, field_name: *const c_char, sig: *const c_char) -> $ty {
            $lift(get_static(class_name, field_name, sig, ValueKind::$kind))
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn $set(
            obj_handle: i64,
            class_name: *const c_char,
            field_name: *const c_char,
            sig: *const c_char,
            value: $ty,
        ) {
            set_instance(obj_handle, class_name, field_name, sig, ValueKind::$kind, $lower(value));
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn $set_static(
            class_name: *const c_char,
            field_name: *const c_char,
            sig: *const c_char,
            value: $ty,
        ) {
            set_static(class_name, field_name, sig, ValueKind::$kind, $lower(value));
        }
    )*};
}

field_stubs! {
    jni_get_int_field, jni_get_static_int_field, jni_set_int_field, jni_set_static_int_field:
        i32 = Int via Word::as_i32, Word::from_i32;
    jni_get_long_field, jni_get_static_long_field, jni_set_long_field, jni_set_static_long_field:
        i64 = Long via Word::as_i64, Word::from_i64;
    jni_get_double_field, jni_get_static_double_field, jni_set_double_field, jni_set_static_double_field:
        f64 = Double via Word::as_f64, Word::from_f64;
    jni_get_float_field, jni_get_static_float_field, jni_set_float_field, jni_set_static_float_field:
        f32 = Float via Word::as_f32, Word::from_f32;
    jni_get_bool_field, jni_get_static_bool_field, jni_set_bool_field, jni_set_static_bool_field:
        bool = Boolean via Word::as_bool, Word::from_bool;
    jni_get_object_field, jni_get_static_object_field, jni_set_object_field, jni_set_static_object_field:
        i64 = Object via handle_bits, handle_word;
    jni_get_string_field, jni_get_static_string_field, jni_set_string_field, jni_set_static_string_field:
        *const c_char = String via Word::as_ptr, Word::from_ptr;
}

// =========================================================================
// Release
// =========================================================================

/// Drop a handle and un-pin its object. Unknown and `0` handles are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn jni_release_object(handle: i64) {
    bridge().handles().release(Handle::from_raw(handle));
}

/// Free a string returned by any `*_string_*` stub. Null is ignored.
#[unsafe(no_mangle)]
pub extern "C" fn jni_free_string(ptr: *const c_char) {
    // SAFETY: only pointers produced by `alloc_c_string` are handed out.
    unsafe { abi::free_c_string(ptr as *mut c_char) }
}

/// Live handle count, for leak diagnostics.
#[unsafe(no_mangle)]
pub extern "C" fn jni_handle_count() -> i64 {
    bridge().handles().count() as i64
}

// =========================================================================
// Push
// =========================================================================

/// Send a chat message to a player through the host's chat sink.
#[unsafe(no_mangle)]
pub extern "C" fn send_chat_message(player_id: i64, message: *const c_char) {
    // SAFETY: the caller passes a NUL-terminated string for the call's duration.
    match unsafe { abi::read_c_string(message) } {
        Some(message) => {
            bridge().push().send_chat(player_id, &message);
        }
        None => warn!(player_id, "send_chat_message with a null message"),
    }
}
