//! # edgerun
//!
//! **Pluggable Runtime Launcher for Edge-Device Node Agents**
//!
//! This crate lets one orchestrator manage three fundamentally different
//! execution backends — OCI-style containers, bare root-filesystem
//! services, and whole-device dual-partition (A/B) OS images — behind one
//! lifecycle contract, without leaking backend-specific host mutation to
//! the caller.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             edgerun                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                       Runtime Trait                         │    │
//! │  │   start() → start_instance(info) → stop_instance(ident)     │    │
//! │  │                  runtime_info() / reboot()                  │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                  Runtime Registry                         │      │
//! │  │  plugin tag → backend, resolved once at config load       │      │
//! │  └───────────────────────────┼───────────────────────────────┘      │
//! │                              │                                      │
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────┐             │
//! │  │ Container    │  │ Rootfs         │  │ Boot         │             │
//! │  │ mounts,      │  │ version file,  │  │ A/B slots,   │             │
//! │  │ whiteouts,   │  │ health-check   │  │ image write, │             │
//! │  │ monitoring   │  │ polling        │  │ verify/roll  │             │
//! │  └──────────────┘  └────────────────┘  └──────┬───────┘             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                    systemd Supervision                              │
//! │  SystemdRebooter (reboot.target)  SystemdUpdateChecker (unit set)   │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                    PartitionManager                                 │
//! │  pure slot math: /dev/nvme1n1p3 → (/dev/nvme1n1, 3)                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # A/B Update State Machine
//!
//! OS updates cannot be made atomic at the OS level, so the boot runtime
//! models them as an explicit state machine that survives the reboot:
//!
//! ```text
//! Idle → SlotSelected → ImageWritten → Rebooting → Verifying ─→ Committed
//!                                                       │
//!                                                       └────→ RolledBack
//! ```
//!
//! The bootloader slot-pointer flip is the last durable write before the
//! reboot, so a crash at any earlier point leaves the previous slot
//! bootable. Failed post-reboot verification flips the pointer back and
//! reboots once more — the only automatic retry in the subsystem.
//!
//! # External Collaborators
//!
//! The launcher consumes narrow trait interfaces for everything that
//! touches the outside world: host filesystem mutation ([`FileSystem`]),
//! the monitoring sink ([`Monitoring`]), node hardware inventory
//! ([`NodeInfoProvider`]), the systemd connection ([`SystemdConn`]), and
//! the bootloader slot pointer ([`BootController`]). Cloud protocol
//! encoding, IAM, network namespaces, and UID/GID allocation live
//! upstream and hand the launcher fully-resolved instance descriptors.
//!
//! # Concurrency Model
//!
//! Instance lifecycle operations may run concurrently across instances
//! and runtimes, but operations against the same instance ident must be
//! serialized by the caller. systemd calls carry explicit per-call
//! timeouts so a hung service manager cannot stall unrelated instance
//! operations. None of the operations are cancellable mid-flight; reboot
//! in particular cannot be cancelled once accepted.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use edgerun::{Collaborators, RuntimeRegistry};
//!
//! #[tokio::main]
//! async fn main() -> edgerun::Result<()> {
//!     let configs = load_runtime_configs()?;
//!     let registry = RuntimeRegistry::new(&configs, &collaborators())?;
//!
//!     for runtime in registry.all() {
//!         runtime.start().await?;
//!         println!("{:?}", runtime.runtime_info());
//!     }
//!
//!     // ... orchestrator drives start_instance/stop_instance ...
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod fs;
pub mod monitoring;
pub mod nodeinfo;
pub mod partition;
pub mod runtime;
pub mod supervision;
pub mod systemd;

pub mod runtimes;

// Re-exports
pub use config::{BootConfig, ContainerConfig, Host, Mount, RootfsConfig, RuntimeConfig};
pub use error::{Error, ErrorKind, Result};
pub use fs::{DeviceNode, FileSystem};
pub use monitoring::{InstanceMonitoringData, Monitoring};
pub use nodeinfo::{CpuInfo, NodeInfo, NodeInfoProvider, OsInfo};
pub use partition::{PartInfo, PartitionManager};
pub use runtime::{
    create_runtime_info, InstanceIdent, InstanceInfo, InstanceState, InstanceStatus,
    InstanceStatusReceiver, Runtime, RuntimeInfo,
};
pub use supervision::{SystemdRebooter, SystemdUpdateChecker};
pub use systemd::{SystemdConn, UnitStartMode, UnitState, UnitStatus};
pub use runtimes::{
    BootController, BootRuntime, Collaborators, ContainerRuntime, RootfsRuntime, RuntimeRegistry,
    UpdateState,
};
