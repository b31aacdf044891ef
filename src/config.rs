//! Bridge configuration.
//!
//! Resolution order: built-in defaults, then `dart_bridge.json` next to the
//! program image (if present), then environment overrides.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;

/// File looked up in the program image's directory.
pub const CONFIG_FILE: &str = "dart_bridge.json";

pub const ENV_VM_LIBRARY: &str = "DART_BRIDGE_VM_LIBRARY";
pub const ENV_SERVICE_PORT: &str = "DART_BRIDGE_SERVICE_PORT";
pub const ENV_LOG: &str = "DART_BRIDGE_LOG";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Path or bare file name of the VM embedding library.
    pub vm_library: PathBuf,
    /// Top-level function run once after the image loads.
    pub entry_point: String,
    pub start_service_isolate: bool,
    pub service_host: String,
    pub service_port: u16,
    /// Overrides the package config derived from the image location.
    pub package_config: Option<PathBuf>,
    /// `tracing` filter directive.
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            vm_library: PathBuf::from(libloading::library_filename("dart_dll")),
            entry_point: String::from("main"),
            start_service_isolate: true,
            service_host: String::from("127.0.0.1"),
            service_port: 5858,
            package_config: None,
            log_filter: String::from("info"),
        }
    }
}

impl BridgeConfig {
    /// Configuration for the image at `image`: its sibling config file, if
    /// any, with environment overrides applied.
    pub fn load_for(image: &Path) -> Result<Self, ConfigError> {
        let mut config = match image.parent() {
            Some(dir) => Self::from_file_if_present(&dir.join(CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_file_if_present(path: &Path) -> Result<Self, ConfigError> {
        match Self::from_file(path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply overrides from `lookup`; unparsable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(library) = lookup(ENV_VM_LIBRARY).filter(|v| !v.is_empty()) {
            self.vm_library = PathBuf::from(library);
        }
        if let Some(port) = lookup(ENV_SERVICE_PORT) {
            match port.trim().parse::<u16>() {
                Ok(0) => self.start_service_isolate = false,
                Ok(port) => {
                    self.start_service_isolate = true;
                    self.service_port = port;
                }
                Err(_) => warn!(value = %port, "ignoring invalid {ENV_SERVICE_PORT}"),
            }
        }
        if let Some(filter) = lookup(ENV_LOG).filter(|v| !v.is_empty()) {
            self.log_filter = filter;
        }
    }

    /// Debug service URL, or `None` when the service isolate is disabled.
    pub fn service_url(&self) -> Option<String> {
        self.start_service_isolate
            .then(|| format!("http://{}:{}/", self.service_host, self.service_port))
    }

    /// Package config for `image`: `<package root>/.dart_tool/package_config.json`,
    /// where the package root is the parent of a `lib` directory.
    pub fn package_config_for(&self, image: &Path) -> PathBuf {
        if let Some(explicit) = &self.package_config {
            return explicit.clone();
        }
        let dir = image.parent().unwrap_or_else(|| Path::new(""));
        let root = match dir.file_name() {
            Some(name) if name == OsStr::new("lib") => dir.parent().unwrap_or(dir),
            _ => dir,
        };
        root.join(".dart_tool").join("package_config.json")
    }
}
