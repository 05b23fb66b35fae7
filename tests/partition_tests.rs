//! Tests for partition identity resolution and slot selection.
//!
//! Validates the pure slot math: parent device and partition number
//! extraction for plain and NVMe-style device names, and inactive slot
//! selection for A/B updates.

use std::path::PathBuf;

use edgerun::error::{Error, ErrorKind};
use edgerun::PartitionManager;

// =============================================================================
// get_part_info Tests
// =============================================================================

#[test]
fn test_plain_device_name() {
    let info = PartitionManager::new().get_part_info("/dev/sda3").unwrap();

    assert_eq!(info.device, PathBuf::from("/dev/sda3"));
    assert_eq!(info.parent_device, PathBuf::from("/dev/sda"));
    assert_eq!(info.partition_number, 3);
}

#[test]
fn test_plain_device_multi_digit_partition() {
    let info = PartitionManager::new().get_part_info("/dev/sdb12").unwrap();

    assert_eq!(info.parent_device, PathBuf::from("/dev/sdb"));
    assert_eq!(info.partition_number, 12);
}

#[test]
fn test_nvme_device_name() {
    let info = PartitionManager::new()
        .get_part_info("/dev/nvme1n1p3")
        .unwrap();

    assert_eq!(info.device, PathBuf::from("/dev/nvme1n1p3"));
    assert_eq!(info.parent_device, PathBuf::from("/dev/nvme1n1"));
    assert_eq!(info.partition_number, 3);
}

#[test]
fn test_mmc_device_name() {
    let info = PartitionManager::new()
        .get_part_info("/dev/mmcblk0p2")
        .unwrap();

    assert_eq!(info.parent_device, PathBuf::from("/dev/mmcblk0"));
    assert_eq!(info.partition_number, 2);
}

#[test]
fn test_loop_device_keeps_trailing_p() {
    // The base name ends in 'p' but is not preceded by a digit, so the
    // 'p' belongs to the device name, not the partition suffix.
    let info = PartitionManager::new().get_part_info("/dev/loop7").unwrap();

    assert_eq!(info.parent_device, PathBuf::from("/dev/loop"));
    assert_eq!(info.partition_number, 7);
}

#[test]
fn test_no_trailing_digits_fails() {
    let err = PartitionManager::new()
        .get_part_info("/dev/sda")
        .unwrap_err();

    assert!(matches!(err, Error::NotAPartition(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_zero_partition_number_fails() {
    let err = PartitionManager::new()
        .get_part_info("/dev/sda0")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_digits_only_path_fails() {
    let err = PartitionManager::new().get_part_info("123").unwrap_err();

    assert!(matches!(err, Error::NotAPartition(_)));
}

// =============================================================================
// select_inactive_slot Tests
// =============================================================================

#[test]
fn test_select_inactive_slot_two_slots() {
    let manager = PartitionManager::new();
    let slots = vec![PathBuf::from("/dev/sda1"), PathBuf::from("/dev/sda2")];

    let inactive = manager.select_inactive_slot("/dev/sda1", &slots).unwrap();
    assert_eq!(inactive.device, PathBuf::from("/dev/sda2"));
    assert_eq!(inactive.partition_number, 2);

    let inactive = manager.select_inactive_slot("/dev/sda2", &slots).unwrap();
    assert_eq!(inactive.device, PathBuf::from("/dev/sda1"));
    assert_eq!(inactive.partition_number, 1);
}

#[test]
fn test_select_inactive_slot_nvme() {
    let manager = PartitionManager::new();
    let slots = vec![
        PathBuf::from("/dev/nvme0n1p1"),
        PathBuf::from("/dev/nvme0n1p2"),
    ];

    let inactive = manager
        .select_inactive_slot("/dev/nvme0n1p2", &slots)
        .unwrap();
    assert_eq!(inactive.device, PathBuf::from("/dev/nvme0n1p1"));
}

#[test]
fn test_select_inactive_slot_no_alternative() {
    let manager = PartitionManager::new();
    let slots = vec![PathBuf::from("/dev/sda1")];

    let err = manager.select_inactive_slot("/dev/sda1", &slots).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_select_inactive_slot_invalid_current() {
    let manager = PartitionManager::new();
    let slots = vec![PathBuf::from("/dev/sda1"), PathBuf::from("/dev/sda2")];

    let err = manager.select_inactive_slot("/dev/sda", &slots).unwrap_err();
    assert!(matches!(err, Error::NotAPartition(_)));
}
