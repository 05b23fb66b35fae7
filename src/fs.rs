//! Filesystem collaborator contract.
//!
//! All host-filesystem mutation the container runtime performs (layered
//! rootfs mounts, whiteouts, storage/state preparation) goes through this
//! trait. The launcher itself never issues mount syscalls; it sequences
//! the calls and handles cleanup on failure.
//!
//! Implementations must serialize operations that touch the same path;
//! the launcher guarantees single-writer discipline per instance but not
//! across instances sharing a mount point.

use std::path::{Path, PathBuf};

use crate::config::Mount;
use crate::error::Result;

/// Host device node description, as populated into an instance rootfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    /// Path of the device inside the instance.
    pub path: PathBuf,
    /// Device type ("c" for character, "b" for block).
    pub dev_type: String,
    /// Major device number.
    pub major: i64,
    /// Minor device number.
    pub minor: i64,
    /// Access permissions (e.g. "rwm").
    pub permissions: String,
}

/// Filesystem operations collaborator.
///
/// Each method returns an error on failure; none retries internally.
pub trait FileSystem: Send + Sync {
    /// Creates host-filesystem whiteouts for the given host binds.
    fn create_host_fs_whiteouts(&self, dir: &Path, host_binds: &[String]) -> Result<()>;

    /// Creates mount points under the instance mount-point directory.
    fn create_mount_points(&self, dir: &Path, mounts: &[Mount]) -> Result<()>;

    /// Mounts the layered instance root filesystem.
    fn mount_service_rootfs(&self, rootfs_dir: &Path, layers: &[PathBuf]) -> Result<()>;

    /// Unmounts the instance root filesystem.
    fn umount_service_rootfs(&self, rootfs_dir: &Path) -> Result<()>;

    /// Prepares the per-instance storage directory with the given owner.
    fn prepare_service_storage(&self, dir: &Path, uid: libc::uid_t, gid: libc::gid_t)
        -> Result<()>;

    /// Prepares the per-instance state directory with the given owner.
    fn prepare_service_state(&self, dir: &Path, uid: libc::uid_t, gid: libc::gid_t) -> Result<()>;

    /// Prepares the per-instance network directory.
    fn prepare_network_dir(&self, dir: &Path) -> Result<()>;

    /// Returns the absolute form of a path.
    fn get_abs_path(&self, path: &Path) -> Result<PathBuf>;

    /// Returns the GID of a named group.
    fn get_gid_by_name(&self, group_name: &str) -> Result<libc::gid_t>;

    /// Enumerates host device nodes under a device path.
    fn populate_host_devices(&self, device_path: &Path) -> Result<Vec<DeviceNode>>;

    /// Creates a directory and all missing parents.
    fn make_dir_all(&self, path: &Path) -> Result<()>;

    /// Removes directory contents, keeping the directory itself.
    fn clear_dir(&self, path: &Path) -> Result<()>;

    /// Removes a path and everything under it.
    fn remove_all(&self, path: &Path) -> Result<()>;

    /// Lists directory entries (directories only).
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;
}
