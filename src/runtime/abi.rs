//! Word-level value representation for the flat C ABI
//!
//! Every argument and result slot that crosses the boundary is one 64-bit
//! word. The word carries no tag; its meaning comes entirely from the
//! accompanying JVM signature string:
//! - boolean/byte/char/short/int/long: the integer value (narrowed on decode)
//! - float: IEEE 754 single precision bits in the lower 32 bits
//! - double: IEEE 754 double precision bits in all 64 bits
//! - object/array: a [`Handle`], `0` for null
//! - string: a pointer to a NUL-terminated UTF-8 buffer, `0` for null
//!
//! The float and double encodings are bit patterns, never numeric
//! conversions, so NaN payloads and signed zeros survive unchanged.

use std::ffi::{CStr, c_char};
use std::fmt;
use std::ptr;

/// Opaque identifier for one pinned host object.
///
/// `0` is the null sentinel; live handles are strictly positive and never
/// reused for the lifetime of the process.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Handle(i64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        Handle(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One untagged 64-bit argument or result slot.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Word {
    bits: i64,
}

impl Word {
    /// The zero value of every kind: `0`, `0.0`, `false`, null.
    pub const ZERO: Word = Word { bits: 0 };

    // =========================================================================
    // Constructors
    // =========================================================================

    #[inline]
    pub const fn from_bits(bits: i64) -> Self {
        Self { bits }
    }

    #[inline]
    pub const fn from_bool(b: bool) -> Self {
        Self { bits: b as i64 }
    }

    #[inline]
    pub const fn from_i32(n: i32) -> Self {
        Self { bits: n as i64 }
    }

    #[inline]
    pub const fn from_i64(n: i64) -> Self {
        Self { bits: n }
    }

    /// Float bits go in the lower 32 bits; the upper half is zero.
    #[inline]
    pub fn from_f32(n: f32) -> Self {
        Self {
            bits: n.to_bits() as i64,
        }
    }

    #[inline]
    pub fn from_f64(n: f64) -> Self {
        Self {
            bits: n.to_bits() as i64,
        }
    }

    #[inline]
    pub const fn from_handle(handle: Handle) -> Self {
        Self { bits: handle.0 }
    }

    #[inline]
    pub fn from_ptr(ptr: *const c_char) -> Self {
        Self {
            bits: ptr as usize as i64,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub const fn to_bits(self) -> i64 {
        self.bits
    }

    #[inline]
    pub const fn as_bool(self) -> bool {
        self.bits != 0
    }

    #[inline]
    pub const fn as_i8(self) -> i8 {
        self.bits as i8
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.bits as u16
    }

    #[inline]
    pub const fn as_i16(self) -> i16 {
        self.bits as i16
    }

    #[inline]
    pub const fn as_i32(self) -> i32 {
        self.bits as i32
    }

    #[inline]
    pub const fn as_i64(self) -> i64 {
        self.bits
    }

    /// Reinterpret the lower 32 bits as an `f32`.
    #[inline]
    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.bits as u32)
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.bits as u64)
    }

    #[inline]
    pub const fn as_handle(self) -> Handle {
        Handle(self.bits)
    }

    #[inline]
    pub fn as_ptr(self) -> *const c_char {
        self.bits as usize as *const c_char
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({:#018x})", self.bits as u64)
    }
}

// =========================================================================
// C strings
// =========================================================================

/// Copy `s` into a `malloc`ed, NUL-terminated buffer.
///
/// The buffer belongs to the caller and must be released with
/// [`free_c_string`] (or `free()` on the foreign side). Returns null if the
/// allocation fails.
pub fn alloc_c_string(s: &str) -> *mut c_char {
    let bytes = s.as_bytes();
    // SAFETY: the buffer is `len + 1` bytes and both copies stay in bounds.
    unsafe {
        let buf = libc::malloc(bytes.len() + 1) as *mut u8;
        if buf.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
        *buf.add(bytes.len()) = 0;
        buf as *mut c_char
    }
}

/// Release a buffer returned by [`alloc_c_string`]. Null is ignored.
///
/// # Safety
/// `ptr` must be null or come from [`alloc_c_string`] and not have been freed.
pub unsafe fn free_c_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe { libc::free(ptr as *mut libc::c_void) };
    }
}

/// Borrow a NUL-terminated buffer as a `CStr`, or `None` for null.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated buffer that stays valid
/// for `'a`.
pub unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) })
    }
}

/// Copy a NUL-terminated UTF-8 buffer into an owned `String`.
///
/// Invalid UTF-8 is replaced rather than rejected.
///
/// # Safety
/// Same contract as [`c_str`]; the buffer only needs to live for the call.
pub unsafe fn read_c_string(ptr: *const c_char) -> Option<String> {
    unsafe { c_str(ptr) }.map(|s| s.to_string_lossy().into_owned())
}
