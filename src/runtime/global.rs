//! The process-wide bridge behind every exported symbol.

use std::sync::OnceLock;

use crate::bridge::Bridge;
use crate::embedder::DartVm;
use crate::host::JniHost;

pub type GlobalBridge = Bridge<JniHost, DartVm>;

static BRIDGE: OnceLock<GlobalBridge> = OnceLock::new();

#[inline]
pub fn bridge() -> &'static GlobalBridge {
    BRIDGE.get_or_init(|| Bridge::new(JniHost::new(), DartVm::new()))
}
