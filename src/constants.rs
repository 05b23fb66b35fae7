//! # Launcher Constants
//!
//! Defines defaults, limits, and timeouts for the runtime launcher. These
//! constants are the **single source of truth** for configuration defaults
//! throughout the codebase.
//!
//! ## Cross-References
//!
//! - [`crate::config`]: Uses the directory defaults when sub-config fields
//!   are absent
//! - [`crate::supervision`]: Uses the systemd timeouts and the reboot target
//! - [`crate::runtimes`]: Uses the capacity limits per backend

use std::time::Duration;

// =============================================================================
// Runtime Plugin Names
// =============================================================================

/// Plugin name of the container runtime backend.
pub const RUNTIME_CONTAINER: &str = "container";

/// Plugin name of the rootfs runtime backend.
pub const RUNTIME_ROOTFS: &str = "rootfs";

/// Plugin name of the boot (A/B OS image) runtime backend.
pub const RUNTIME_BOOT: &str = "boot";

// =============================================================================
// Configuration Defaults
// =============================================================================
//
// Directory defaults are rooted under the runtime's working directory when
// the sub-config omits them. Absolute defaults match the paths the host OS
// image ships with.
// =============================================================================

/// Default container runtime directory.
pub const DEFAULT_RUNTIME_DIR: &str = "/run/edgerun/runtime";

/// Host whiteouts directory, relative to the working directory.
pub const WHITEOUTS_SUBDIR: &str = "whiteouts";

/// Instance storage directory, relative to the working directory.
pub const STORAGES_SUBDIR: &str = "storages";

/// Instance state directory, relative to the working directory.
pub const STATES_SUBDIR: &str = "states";

/// Rootfs runtime working directory, relative to the working directory.
pub const ROOTFS_RUNTIME_SUBDIR: &str = "runtimes/rootfs";

/// Boot runtime working directory, relative to the working directory.
pub const BOOT_RUNTIME_SUBDIR: &str = "runtimes/boot";

/// Default OS version file consulted by the rootfs runtime.
pub const DEFAULT_VERSION_FILE: &str = "/etc/aos/version";

/// Default boot version file, relative to the boot runtime working directory.
pub const DEFAULT_BOOT_VERSION_FILE: &str = "aos/version";

// =============================================================================
// Capacity Limits
// =============================================================================

/// Maximum number of concurrent instances per container runtime.
///
/// Bounds the memory held by per-instance bookkeeping. Whole-device
/// runtimes (rootfs, boot) manage exactly one instance.
pub const MAX_CONTAINER_INSTANCES: usize = 256;

/// Instance capacity of runtimes that replace the whole device image.
pub const SINGLE_INSTANCE: usize = 1;

// =============================================================================
// systemd Supervision
// =============================================================================

/// Target unit started to request a host reboot.
pub const REBOOT_TARGET: &str = "reboot.target";

/// Timeout applied to every systemd connection call.
///
/// A hung service manager must not stall unrelated instance operations;
/// callers see `Error::Timeout` once this deadline passes.
pub const SYSTEMD_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the update checker waits for units to leave transient states
/// (activating/deactivating) before the verdict is taken.
pub const UNIT_SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll interval while waiting for units to settle.
pub const UNIT_SETTLE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Interval between rootfs health-check polls.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

// =============================================================================
// Identifier Validation
// =============================================================================

/// Maximum instance identifier length in bytes.
pub const MAX_INSTANCE_ID_LEN: usize = 128;

/// Validates an instance identifier.
///
/// Identifiers become path components under the storage and state
/// directories, so path separators and parent references are rejected.
pub fn validate_instance_id(id: &str) -> crate::error::Result<()> {
    if id.is_empty() {
        return Err(crate::error::Error::InvalidArgument(
            "instance id is empty".to_string(),
        ));
    }

    if id.len() > MAX_INSTANCE_ID_LEN {
        return Err(crate::error::Error::InvalidArgument(format!(
            "instance id exceeds {} bytes",
            MAX_INSTANCE_ID_LEN
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(crate::error::Error::InvalidArgument(format!(
            "instance id contains invalid characters: {}",
            id
        )));
    }

    if id.starts_with('.') {
        return Err(crate::error::Error::InvalidArgument(format!(
            "instance id must not start with '.': {}",
            id
        )));
    }

    Ok(())
}
