//! Common runtime lifecycle contract.
//!
//! One orchestrator manages three fundamentally different execution
//! backends (containers, bare rootfs services, whole-device OS images)
//! behind this trait. Backend-specific host mutation never leaks to the
//! caller: every backend is driven through the same
//! `start_instance`/`stop_instance` pair and reports the same
//! [`InstanceStatus`] snapshots.
//!
//! # Lifecycle
//!
//! ```text
//! init → start() → start_instance(info) → running → stop_instance(ident) → stopped
//! ```
//!
//! Operations against the **same instance ident** must be serialized by
//! the caller; concurrent start+stop on one ident is undefined ordering.
//! Operations on different instances may run concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::Mount;
use crate::error::{Error, Result};
use crate::monitoring::InstanceMonitoringData;
use crate::nodeinfo::{NodeInfo, OsInfo};

// =============================================================================
// Instance Identity
// =============================================================================

/// Identity of one deployed workload unit.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdent {
    /// Service the instance belongs to.
    pub service_id: String,
    /// Subject the instance runs for.
    pub subject_id: String,
    /// Instance index within (service, subject).
    pub instance: u64,
}

impl std::fmt::Display for InstanceIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.service_id, self.subject_id, self.instance)
    }
}

/// Fully-resolved instance descriptor handed down by the orchestrator.
///
/// Identity resolution, image unpacking, and UID/GID allocation happen
/// upstream; the launcher consumes the result as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    /// Instance identity.
    pub ident: InstanceIdent,
    /// Assigned user ID.
    pub uid: libc::uid_t,
    /// Assigned group ID.
    pub gid: libc::gid_t,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: u64,
    /// Version of the deployed item.
    pub version: String,
    /// Manifest digest identifying the exact content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_digest: Option<String>,
    /// Pre-extracted filesystem layers, lowest first.
    #[serde(default)]
    pub layers: Vec<PathBuf>,
    /// Additional mounts applied at start.
    #[serde(default)]
    pub mounts: Vec<Mount>,
    /// Staged OS image, for whole-device runtimes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}

// =============================================================================
// Instance Status
// =============================================================================

/// Observed instance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Start sequence in progress.
    Activating,
    /// Instance is running.
    Active,
    /// Instance is stopped.
    Inactive,
    /// Start or verification failed.
    Failed,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activating => write!(f, "activating"),
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Instance status snapshot reported to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    /// Instance identity.
    pub ident: InstanceIdent,
    /// Runtime the instance runs on.
    pub runtime_id: String,
    /// Observed state.
    pub state: InstanceState,
    /// Version of the deployed item.
    pub version: String,
    /// Failure description when `state` is failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Snapshot timestamp.
    pub timestamp: DateTime<Utc>,
}

impl InstanceStatus {
    /// Creates a status snapshot for an instance on a runtime.
    pub fn new(ident: InstanceIdent, runtime_id: &str, state: InstanceState, version: &str) -> Self {
        Self {
            ident,
            runtime_id: runtime_id.to_string(),
            state,
            version: version.to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Marks the status failed with the given error.
    pub fn with_error(mut self, err: &Error) -> Self {
        self.state = InstanceState::Failed;
        self.error = Some(err.to_string());
        self
    }
}

/// Receiver of instance status snapshots.
///
/// External collaborator; runtimes push every state transition here so
/// the orchestrator sees activating/active/failed without polling.
pub trait InstanceStatusReceiver: Send + Sync {
    /// Delivers one status snapshot.
    fn on_instance_status(&self, status: InstanceStatus);

    /// Signals that a staged update needs a host reboot to proceed.
    fn reboot_required(&self, runtime_id: &str) -> Result<()>;
}

// =============================================================================
// Runtime Info
// =============================================================================

/// Capacity/capability descriptor a runtime reports upward.
///
/// Built once per runtime at startup from node inventory; immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    /// Deterministic runtime identifier.
    pub runtime_id: String,
    /// Runtime type tag.
    pub runtime_type: String,
    /// CPU architecture, from the node's first CPU descriptor.
    pub arch: String,
    /// OS descriptor, copied verbatim from the node inventory.
    pub os_info: OsInfo,
    /// Maximum concurrent instances.
    pub max_instances: usize,
}

/// Derives a runtime's identity and capacity descriptor from node facts.
///
/// The runtime ID is a name-based (v5) UUID of `"<runtimeType>-<nodeID>"`,
/// so identical inputs yield the identical ID across processes and
/// restarts — the orchestrator relies on this to recognize the same
/// logical runtime slot after an agent restart.
///
/// Fails with an invalid-argument error when the inventory carries no CPU
/// descriptor, since the architecture cannot be determined.
pub fn create_runtime_info(
    runtime_type: &str,
    node_info: &NodeInfo,
    max_instances: usize,
) -> Result<RuntimeInfo> {
    let first_cpu = node_info.cpus.first().ok_or_else(|| {
        Error::InvalidArgument("can't define runtime arch info: node has no CPUs".to_string())
    })?;

    let name = format!("{}-{}", runtime_type, node_info.node_id);
    let runtime_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());

    Ok(RuntimeInfo {
        runtime_id: runtime_id.to_string(),
        runtime_type: runtime_type.to_string(),
        arch: first_cpu.arch.clone(),
        os_info: node_info.os_info.clone(),
        max_instances,
    })
}

// =============================================================================
// Runtime Trait
// =============================================================================

/// Lifecycle backend for one execution technology.
///
/// Implementations: container (OCI-style isolated instances), rootfs
/// (plain root-filesystem services), boot (whole-device A/B OS images).
/// The backend is selected once at configuration-load time, not
/// re-dispatched per call.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Returns the runtime type tag.
    fn runtime_type(&self) -> &str;

    /// Returns the runtime's capacity descriptor.
    fn runtime_info(&self) -> RuntimeInfo;

    /// Starts the runtime after construction.
    async fn start(&self) -> Result<()>;

    /// Stops the runtime on agent shutdown.
    async fn stop(&self) -> Result<()>;

    /// Starts an instance from its resolved descriptor.
    ///
    /// Partial success is never reported as success: a failed step aborts
    /// the sequence, already-applied steps are reverted best-effort, and
    /// the wrapped error identifies the failing step.
    async fn start_instance(&self, instance: &InstanceInfo) -> Result<InstanceStatus>;

    /// Stops an instance.
    ///
    /// Storage and state directories persist across restarts; they are
    /// purged only when `remove` marks the instance as permanently gone.
    async fn stop_instance(&self, ident: &InstanceIdent, remove: bool) -> Result<InstanceStatus>;

    /// Requests a host reboot through this runtime.
    async fn reboot(&self) -> Result<()> {
        Err(Error::NotSupported(format!(
            "reboot not supported by {} runtime",
            self.runtime_type()
        )))
    }

    /// Returns the latest monitoring snapshot for an instance.
    async fn instance_monitoring_data(
        &self,
        ident: &InstanceIdent,
    ) -> Result<InstanceMonitoringData> {
        Err(Error::NotSupported(format!(
            "monitoring not supported by {} runtime for instance {}",
            self.runtime_type(),
            ident
        )))
    }
}
