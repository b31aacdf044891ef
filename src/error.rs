//! Error types for each layer of the bridge.
//!
//! Nothing here ever crosses the C ABI: the stubs in `runtime` turn every
//! error into a sentinel value plus a log line.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::dynamic::{MemberKind, ValueKind};
use crate::embedder::LifecycleState;

/// Failures reported by a [`HostRuntime`](crate::host::HostRuntime).
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host runtime is not attached")]
    Unavailable,

    #[error("type `{0}` not found")]
    TypeNotFound(String),

    #[error("{kind} `{name}` with signature `{signature}` not found on `{class}`")]
    MemberNotFound {
        class: String,
        name: String,
        signature: String,
        kind: MemberKind,
    },

    #[error("member token does not match a {0} operation")]
    MemberKindMismatch(MemberKind),

    #[error("could not pin host reference: {0}")]
    PinFailed(String),

    #[error("host exception raised during {0}")]
    Exception(String),

    #[error("host interface error: {0}")]
    Interface(String),
}

impl From<jni::errors::Error> for HostError {
    fn from(err: jni::errors::Error) -> Self {
        HostError::Interface(err.to_string())
    }
}

/// A malformed JVM type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature is empty")]
    Empty,

    #[error("method signature must start with `(`")]
    MissingOpenParen,

    #[error("parameter list is not closed")]
    UnterminatedParams,

    #[error("missing return type")]
    MissingReturn,

    #[error("unexpected `{found}` at position {position}")]
    UnexpectedChar { found: char, position: usize },

    #[error("class name starting at position {0} has no terminating `;`")]
    UnterminatedClass(usize),

    #[error("`V` at position {0} is only valid as a return type")]
    VoidParameter(usize),

    #[error("trailing input after position {0}")]
    Trailing(usize),
}

/// Reasons a dynamic call returned its zero value.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("receiver handle {0} does not refer to a live object")]
    NullReceiver(i64),

    #[error("`{requested}` result requested but the signature returns `{declared}`")]
    ReturnMismatch {
        requested: ValueKind,
        declared: ValueKind,
    },

    #[error("constructor signature must return `V`, found `{0}`")]
    ConstructorReturn(ValueKind),

    #[error("type or member name is null or not UTF-8")]
    BadName,
}

/// Failures of the embedded VM backend.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("failed to load VM library `{path}`: {source}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("VM library is missing symbol `{symbol}`: {source}")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("VM library is not loaded")]
    NotLoaded,

    #[error("VM subsystem failed to start")]
    StartFailed,

    #[error("program image `{path}` is not readable: {source}")]
    ImageUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("program image `{path}` could not be loaded: {reason}")]
    ImageLoad { path: PathBuf, reason: String },

    #[error("could not enter the isolate: {0}")]
    EnterFailed(String),

    #[error("entry point `{0}` not found")]
    EntryPointMissing(String),

    #[error("entry point `{name}` raised: {message}")]
    EntryPointFailed { name: String, message: String },

    #[error("microtask queue reported: {0}")]
    Microtask(String),
}

/// Failures while reading [`BridgeConfig`](crate::config::BridgeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config `{path}`: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level lifecycle failures.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge is {0}")]
    InvalidState(LifecycleState),

    #[error("shutdown requested from inside the isolate")]
    ShutdownFromIsolate,

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
