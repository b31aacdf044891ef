//! Embedding the Dart VM: backend trait, program image, isolate guard and
//! lifecycle state machine.

pub mod dart;
pub mod guard;
pub mod lifecycle;

#[cfg(test)]
pub mod fake;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::BridgeConfig;
use crate::error::VmError;

pub use dart::DartVm;
pub use guard::{IsolateEntry, IsolateGuard, IsolateSwitch};
pub use lifecycle::{Lifecycle, LifecycleState};

/// Operations the lifecycle manager needs from an embedded VM.
///
/// Calls other than `start`/`load_image`/`stop` are only made while the
/// calling thread holds the isolate guard or is initialising.
pub trait VmRuntime: Send + Sync {
    type Isolate: Copy + Send + Sync + fmt::Debug + 'static;

    /// Bring up the process-wide VM subsystem.
    fn start(&self, config: &BridgeConfig) -> Result<(), VmError>;

    /// Create the single isolate from a program image.
    fn load_image(&self, image: &ProgramImage) -> Result<Self::Isolate, VmError>;

    fn enter_isolate(&self, isolate: Self::Isolate) -> Result<(), VmError>;

    fn exit_isolate(&self);

    fn enter_scope(&self) {}

    fn exit_scope(&self) {}

    /// Call a top-level function of the root library with no arguments.
    fn invoke_entry_point(&self, name: &str) -> Result<(), VmError>;

    /// Run pending microtasks of the current isolate to completion.
    fn drain_microtasks(&self) -> Result<(), VmError>;

    /// Enter and destroy `isolate`.
    fn shutdown_isolate(&self, isolate: Self::Isolate);

    fn stop(&self);
}

/// A program image ready to be loaded into an isolate.
#[derive(Clone, Debug)]
pub struct ProgramImage {
    path: PathBuf,
    package_config: PathBuf,
    fingerprint: String,
}

impl ProgramImage {
    /// Check that `path` is readable and fingerprint its contents.
    pub fn open(path: &Path, config: &BridgeConfig) -> Result<Self, VmError> {
        let bytes = fs::read(path).map_err(|source| VmError::ImageUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            package_config: config.package_config_for(path),
            fingerprint: hex::encode(Sha256::digest(&bytes)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn package_config(&self) -> &Path {
        &self.package_config
    }

    /// Hex SHA-256 of the image contents.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_fingerprints_contents() {
        let dir = std::env::temp_dir().join(format!("dart-bridge-image-{}", std::process::id()));
        fs::create_dir_all(dir.join("lib")).unwrap();
        let path = dir.join("lib").join("main.dart");
        fs::File::create(&path).unwrap().write_all(b"abc").unwrap();

        let image = ProgramImage::open(&path, &BridgeConfig::default()).unwrap();
        assert_eq!(
            image.fingerprint(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(image.package_config(), dir.join(".dart_tool").join("package_config.json"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_open_missing_image() {
        let err = ProgramImage::open(Path::new("/definitely/not/here.dart"), &BridgeConfig::default()).unwrap_err();
        assert!(matches!(err, VmError::ImageUnreadable { .. }));
    }
}
