//! Native bridge between a JVM host and an embedded Dart VM.
//!
//! The host raises events; the bridge enters the single isolate and runs
//! the program's registered handler. Program code calls back into the host
//! through signature-driven dynamic calls, holding host objects by opaque
//! handle.
//!
//! Built as a `cdylib` for `System.loadLibrary`; everything exported lives
//! under [`runtime`].

pub mod bridge;
pub mod config;
pub mod dynamic;
pub mod embedder;
pub mod error;
pub mod events;
pub mod handles;
pub mod host;
pub mod logging;
pub mod push;

// The C ABI and JNI exports
pub mod runtime;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{BridgeError, CallError, HostError, VmError};
pub use runtime::{Handle, Word};
