//! Monitoring collaborator contract.
//!
//! Instances are registered with the monitoring sink as the last step of a
//! successful start and unregistered first on stop, so monitoring never
//! observes a half-prepared instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One monitoring snapshot for an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMonitoringData {
    /// Instance identifier the data belongs to.
    pub instance_id: String,
    /// Snapshot timestamp.
    pub timestamp: DateTime<Utc>,
    /// CPU usage in percent of one core.
    pub cpu_percent: f64,
    /// Resident memory in bytes.
    pub ram_bytes: u64,
    /// Disk usage of the instance storage in bytes.
    pub disk_bytes: u64,
    /// Bytes received over the instance network namespace.
    pub rx_bytes: u64,
    /// Bytes transmitted over the instance network namespace.
    pub tx_bytes: u64,
}

/// Monitoring data sink and source.
pub trait Monitoring: Send + Sync {
    /// Starts monitoring an instance.
    fn start_instance_monitoring(&self, instance_id: &str, uid: libc::uid_t) -> Result<()>;

    /// Stops monitoring an instance.
    fn stop_instance_monitoring(&self, instance_id: &str) -> Result<()>;

    /// Returns the latest monitoring snapshot for an instance.
    fn instance_monitoring_data(&self, instance_id: &str) -> Result<InstanceMonitoringData>;
}
