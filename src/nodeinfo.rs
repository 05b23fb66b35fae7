//! Node hardware and software inventory.
//!
//! The launcher derives each runtime's capacity descriptor from live
//! hardware facts supplied by an external node-info provider. The types
//! here are read-only inputs; the launcher never mutates the inventory.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// CPU descriptor of one processor package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuInfo {
    /// CPU model name as reported by the hardware.
    pub model_name: String,
    /// Number of cores in this package.
    pub num_cores: u64,
    /// Number of hardware threads in this package.
    pub num_threads: u64,
    /// CPU architecture (e.g. "x86_64", "aarch64").
    pub arch: String,
    /// Architecture family/variant (e.g. "v8" for aarch64), if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch_family: Option<String>,
}

/// Operating system descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsInfo {
    /// OS identifier (e.g. "linux").
    pub os: String,
    /// OS version string, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
}

/// Host hardware/software inventory.
///
/// Supplied once by the node-info provider; must contain at least one CPU
/// descriptor for runtime info derivation to succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Stable node identifier.
    pub node_id: String,
    /// Node type tag (e.g. "main", "secondary").
    pub node_type: String,
    /// CPU descriptors, one per package.
    pub cpus: Vec<CpuInfo>,
    /// OS descriptor.
    pub os_info: OsInfo,
}

/// Node inventory provider.
///
/// External collaborator; the launcher only reads the current inventory.
pub trait NodeInfoProvider: Send + Sync {
    /// Returns the current node inventory.
    fn node_info(&self) -> Result<NodeInfo>;
}
