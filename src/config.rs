//! Runtime configuration envelope and per-backend parsers.
//!
//! Configuration loading (external) hands each runtime a generic
//! [`RuntimeConfig`] envelope whose `config` field is an opaque JSON
//! document. Each backend owns its own one-shot parser that turns the
//! document into a typed config; the typed config is immutable afterward.
//!
//! Parse semantics:
//!
//! - absent or wrong-typed *optional* fields silently take the documented
//!   default, rooted at the envelope's working directory
//! - wrong-typed *required* fields (host `ip`/`hostname`) fail with an
//!   invalid-argument error
//! - unrecognized fields are ignored
//! - list-valued fields preserve source order

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    BOOT_RUNTIME_SUBDIR, DEFAULT_BOOT_VERSION_FILE, DEFAULT_RUNTIME_DIR, DEFAULT_VERSION_FILE,
    ROOTFS_RUNTIME_SUBDIR, STATES_SUBDIR, STORAGES_SUBDIR, WHITEOUTS_SUBDIR,
};
use crate::error::{Error, Result};

// =============================================================================
// Envelope
// =============================================================================

/// Generic per-plugin settings envelope.
///
/// Created by configuration loading; consumed once at runtime
/// construction. `working_dir` must be absolute and `runtime_type` must
/// name a registered runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Whether this runtime manages an OS component rather than services.
    #[serde(default)]
    pub is_component: bool,
    /// Plugin (backend) name selecting the implementation.
    pub plugin: String,
    /// Runtime type tag reported upward in the runtime identity.
    #[serde(rename = "type")]
    pub runtime_type: String,
    /// Root directory for this runtime's on-disk data.
    pub working_dir: PathBuf,
    /// Opaque backend-specific sub-config.
    #[serde(default)]
    pub config: Value,
}

impl RuntimeConfig {
    /// Validates envelope invariants.
    pub fn validate(&self) -> Result<()> {
        if !self.working_dir.is_absolute() {
            return Err(Error::InvalidConfig {
                runtime: self.runtime_type.clone(),
                reason: format!(
                    "workingDir must be absolute: {}",
                    self.working_dir.display()
                ),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Shared Types
// =============================================================================

/// DNS host-file entry added to an instance's `/etc/hosts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    /// IP address.
    pub ip: String,
    /// Host name the address resolves to.
    pub hostname: String,
}

/// Filesystem mount descriptor applied at instance start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    /// Mount source on the host.
    pub source: PathBuf,
    /// Mount target inside the instance.
    pub target: PathBuf,
    /// Filesystem type (e.g. "bind", "tmpfs").
    #[serde(rename = "type", default)]
    pub mount_type: String,
    /// Mount options, in source order.
    #[serde(default)]
    pub options: Vec<String>,
}

// =============================================================================
// Typed Configs
// =============================================================================

/// Parsed container runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Directory for transient runtime artifacts.
    pub runtime_dir: PathBuf,
    /// Directory holding host-filesystem whiteouts.
    pub host_whiteouts_dir: PathBuf,
    /// Root of per-instance storage directories.
    pub storage_dir: PathBuf,
    /// Root of per-instance state directories.
    pub state_dir: PathBuf,
    /// Host paths bind-mounted into every instance.
    pub host_binds: Vec<String>,
    /// Host-file entries added to every instance.
    pub hosts: Vec<Host>,
}

impl ContainerConfig {
    /// Parses the container sub-config from the envelope.
    pub fn parse(config: &RuntimeConfig) -> Result<Self> {
        let object = &config.config;
        let working_dir = &config.working_dir;

        Ok(Self {
            runtime_dir: path_or(object, "runtimeDir", PathBuf::from(DEFAULT_RUNTIME_DIR)),
            host_whiteouts_dir: path_or(
                object,
                "hostWhiteoutsDir",
                working_dir.join(WHITEOUTS_SUBDIR),
            ),
            storage_dir: path_or(object, "storageDir", working_dir.join(STORAGES_SUBDIR)),
            state_dir: path_or(object, "stateDir", working_dir.join(STATES_SUBDIR)),
            host_binds: string_array(object, "hostBinds"),
            hosts: host_array(object, "hosts", &config.runtime_type)?,
        })
    }
}

/// Parsed rootfs runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootfsConfig {
    /// Runtime working directory holding update records.
    pub working_dir: PathBuf,
    /// File tracking the currently active OS/service version.
    pub version_file_path: PathBuf,
    /// systemd units polled to judge instance health.
    pub health_check_services: Vec<String>,
}

impl RootfsConfig {
    /// Parses the rootfs sub-config from the envelope.
    pub fn parse(config: &RuntimeConfig) -> Result<Self> {
        let object = &config.config;

        Ok(Self {
            working_dir: path_or(
                object,
                "workingDir",
                config.working_dir.join(ROOTFS_RUNTIME_SUBDIR),
            ),
            version_file_path: path_or(
                object,
                "versionFilePath",
                PathBuf::from(DEFAULT_VERSION_FILE),
            ),
            health_check_services: string_array(object, "healthCheckServices"),
        })
    }
}

/// Parsed boot runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    /// Runtime working directory holding update records.
    pub working_dir: PathBuf,
    /// Bootloader identifier, if the device needs one named explicitly.
    pub loader: Option<String>,
    /// Version file, relative to the mounted slot root.
    pub version_file: PathBuf,
    /// The fixed slot devices (A/B), in configuration order.
    pub partitions: Vec<PathBuf>,
    /// systemd units verified after an update reboot.
    pub health_check_services: Vec<String>,
}

impl BootConfig {
    /// Parses the boot sub-config from the envelope.
    pub fn parse(config: &RuntimeConfig) -> Result<Self> {
        let object = &config.config;

        Ok(Self {
            working_dir: path_or(
                object,
                "workingDir",
                config.working_dir.join(BOOT_RUNTIME_SUBDIR),
            ),
            loader: object
                .get("loader")
                .and_then(Value::as_str)
                .map(str::to_string),
            version_file: path_or(
                object,
                "versionFile",
                PathBuf::from(DEFAULT_BOOT_VERSION_FILE),
            ),
            partitions: string_array(object, "partitions")
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            health_check_services: string_array(object, "healthCheckServices"),
        })
    }
}

// =============================================================================
// Extraction Helpers
// =============================================================================

fn path_or(object: &Value, key: &str, default: PathBuf) -> PathBuf {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .unwrap_or(default)
}

fn string_array(object: &Value, key: &str) -> Vec<String> {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn host_array(object: &Value, key: &str, runtime_type: &str) -> Result<Vec<Host>> {
    let Some(items) = object.get(key).and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    items
        .iter()
        .map(|item| {
            let ip = required_str(item, "ip", runtime_type)?;
            let hostname = required_str(item, "hostname", runtime_type)?;

            Ok(Host {
                ip: ip.to_string(),
                hostname: hostname.to_string(),
            })
        })
        .collect()
}

fn required_str<'a>(object: &'a Value, key: &str, runtime_type: &str) -> Result<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidConfig {
            runtime: runtime_type.to_string(),
            reason: format!("'{}' must be a string", key),
        })
}
