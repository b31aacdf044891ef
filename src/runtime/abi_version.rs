//! Boundary ABI version.
//!
//! Bump `ABI_VERSION` whenever an exported signature, the word encoding or
//! the ownership rules for returned strings change.

pub const ABI_VERSION: u32 = 1;

pub const ABI_NAME: &str = "dart_mc_bridge";

/// Lets the VM side refuse to bind against an incompatible library.
#[unsafe(no_mangle)]
pub extern "C" fn dart_bridge_abi_version() -> u32 {
    ABI_VERSION
}
