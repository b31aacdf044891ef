//! The flat C ABI and JNI surface.
//!
//! This module is everything the VM and the host link against. It separates:
//! - Value representation for the boundary (abi.rs)
//! - Dynamic call stubs into the host (stubs.rs)
//! - Event registration and dispatch exports (callbacks.rs)
//! - Lifecycle exports (entry.rs)
//!
//! All exports share the single process-wide bridge in global.rs.

pub mod abi;
pub mod abi_version;
pub mod callbacks;
pub mod entry;
pub mod global;
pub mod stubs;

pub use abi::{Handle, Word};
pub use abi_version::ABI_VERSION;
pub use global::bridge;
