//! Partition identity and A/B slot math.
//!
//! [`PartitionManager::get_part_info`] resolves a block-device path into
//! (parent device, partition number) with pure string math and no device
//! I/O. It is the single source of truth for slot selection: the boot
//! runtime uses it to find the inactive slot before streaming a new OS
//! image.
//!
//! Two device naming schemes are handled:
//!
//! | Scheme | Example | Parent | Partition |
//! |--------|----------------|--------------|-----------|
//! | plain  | `/dev/sda3` | `/dev/sda` | 3 |
//! | NVMe   | `/dev/nvme1n1p3` | `/dev/nvme1n1` | 3 |
//!
//! NVMe-style names carry a literal `p` separator because the base device
//! name itself ends in a digit; the separator is stripped from the parent.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Identity of one OS partition.
///
/// Computed on demand from a device path string; not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    /// Full partition device path (e.g. `/dev/nvme1n1p3`).
    pub device: PathBuf,
    /// Parent device path with the partition suffix removed.
    pub parent_device: PathBuf,
    /// 1-based partition number.
    pub partition_number: u32,
}

/// Resolves partition identity and installs OS images to raw devices.
///
/// Stateless; invoked per call and holds no instance-scoped state.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionManager;

impl PartitionManager {
    /// Creates a new partition manager.
    pub fn new() -> Self {
        Self
    }

    /// Resolves a block-device path into its partition identity.
    ///
    /// The trailing run of decimal digits is the partition number; the
    /// remainder is the parent device. When the name left after stripping
    /// the digits ends in a `p` preceded by a digit (NVMe-style), the `p`
    /// separator is stripped from the parent as well.
    ///
    /// Fails with [`Error::NotAPartition`] when the path has no trailing
    /// digits, and with [`Error::InvalidArgument`] when the partition
    /// number is zero.
    pub fn get_part_info(&self, device_path: &str) -> Result<PartInfo> {
        let digits_start = device_path
            .rfind(|c: char| !c.is_ascii_digit())
            .map(|i| i + 1)
            .unwrap_or(0);

        let digits = &device_path[digits_start..];
        if digits.is_empty() {
            return Err(Error::NotAPartition(device_path.to_string()));
        }

        let partition_number: u32 = digits
            .parse()
            .map_err(|_| Error::NotAPartition(device_path.to_string()))?;
        if partition_number == 0 {
            return Err(Error::InvalidArgument(format!(
                "partition number must be positive: {}",
                device_path
            )));
        }

        let mut parent = &device_path[..digits_start];

        // NVMe-style names: a digit before the `p` separator marks the
        // separator as part of the partition suffix, not the device name.
        if let Some(stripped) = parent.strip_suffix('p') {
            if stripped.ends_with(|c: char| c.is_ascii_digit()) {
                parent = stripped;
            }
        }

        if parent.is_empty() || parent.ends_with('/') {
            return Err(Error::NotAPartition(device_path.to_string()));
        }

        debug!(
            device = device_path,
            parent = parent,
            partition = partition_number,
            "resolved partition info"
        );

        Ok(PartInfo {
            device: PathBuf::from(device_path),
            parent_device: PathBuf::from(parent),
            partition_number,
        })
    }

    /// Selects the inactive slot among the configured slot devices.
    ///
    /// `current` is the currently mounted root partition; `slots` is the
    /// fixed two-slot set from the boot runtime configuration. Returns the
    /// first configured slot whose partition number differs from the
    /// current one.
    pub fn select_inactive_slot(&self, current: &str, slots: &[PathBuf]) -> Result<PartInfo> {
        let current_info = self.get_part_info(current)?;

        for slot in slots {
            let slot_str = slot.to_string_lossy();
            let info = self.get_part_info(&slot_str)?;

            if info.partition_number != current_info.partition_number
                || info.parent_device != current_info.parent_device
            {
                return Ok(info);
            }
        }

        Err(Error::InvalidArgument(format!(
            "no inactive slot found for current device {}",
            current
        )))
    }

    /// Streams an OS image to a raw slot device.
    ///
    /// Delegates the block copy to an external `dd` process; a non-zero
    /// exit surfaces as [`Error::CommandFailed`].
    pub async fn install_image(&self, image: &Path, device: &Path) -> Result<()> {
        info!(image = %image.display(), device = %device.display(), "install image");

        self.run_dd(image, device).await
    }

    /// Copies one raw device onto another.
    ///
    /// No-op when source and destination are the same device.
    pub async fn copy_device(&self, src: &Path, dst: &Path) -> Result<()> {
        if src == dst {
            return Ok(());
        }

        info!(src = %src.display(), dst = %dst.display(), "copy device");

        self.run_dd(src, dst).await
    }

    async fn run_dd(&self, src: &Path, dst: &Path) -> Result<()> {
        let status = Command::new("dd")
            .arg(format!("if={}", src.display()))
            .arg(format!("of={}", dst.display()))
            .arg("bs=1M")
            .arg("conv=fsync")
            .status()
            .await
            .map_err(|err| Error::ImageWriteFailed {
                image: src.to_path_buf(),
                device: dst.to_path_buf(),
                reason: err.to_string(),
            })?;

        if !status.success() {
            return Err(Error::CommandFailed {
                command: format!("dd if={} of={}", src.display(), dst.display()),
                code: status.code().unwrap_or(-1),
            });
        }

        Ok(())
    }
}
