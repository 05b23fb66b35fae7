//! systemd connection contract.
//!
//! The launcher never talks to the service manager directly; it goes
//! through [`SystemdConn`], a single long-lived handle shared by reference
//! across runtimes. The handle carries no mutable state beyond the
//! connection itself, so concurrent calls need no locking.
//!
//! Every call takes an explicit timeout where it can block: calls against
//! a wedged service manager must fail with [`Error::Timeout`] instead of
//! stalling unrelated instance operations.
//!
//! [`Error::Timeout`]: crate::error::Error::Timeout

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Observed activation state of a systemd unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    /// Unit is active and running.
    Active,
    /// Unit is inactive.
    Inactive,
    /// Unit entered the failed state.
    Failed,
    /// Unit is starting up.
    Activating,
    /// Unit is shutting down.
    Deactivating,
    /// Any state not covered above.
    Unknown,
}

impl UnitState {
    /// Parses the systemd `ActiveState` property value.
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            "failed" => Self::Failed,
            "activating" => Self::Activating,
            "deactivating" => Self::Deactivating,
            _ => Self::Unknown,
        }
    }

    /// Returns true while the unit is still transitioning.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Activating | Self::Deactivating)
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Failed => write!(f, "failed"),
            Self::Activating => write!(f, "activating"),
            Self::Deactivating => write!(f, "deactivating"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Snapshot of one unit's state, re-fetched on each poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatus {
    /// Unit name (e.g. "edgerun.service").
    pub name: String,
    /// Activation state.
    pub state: UnitState,
    /// Exit code of the unit's main process, if it has exited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Job mode for start/stop requests.
///
/// Matches the fixed vocabulary the service manager accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStartMode {
    /// Replace conflicting queued jobs.
    Replace,
    /// Replace conflicting jobs, including irreversible ones.
    ReplaceIrreversibly,
    /// Fail if a conflicting job is queued.
    Fail,
    /// Isolate: stop all units not required by this one.
    Isolate,
}

impl UnitStartMode {
    /// Returns the wire string the service manager expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::ReplaceIrreversibly => "replace-irreversibly",
            Self::Fail => "fail",
            Self::Isolate => "isolate",
        }
    }
}

impl std::fmt::Display for UnitStartMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// systemd connection.
///
/// External collaborator wrapping the bus connection to the host service
/// manager. Implementations must be safe to call from multiple tasks
/// concurrently; the launcher shares one handle across all runtimes.
#[async_trait]
pub trait SystemdConn: Send + Sync {
    /// Lists all known units.
    async fn list_units(&self) -> Result<Vec<UnitStatus>>;

    /// Fetches the status of a single unit.
    async fn get_unit_status(&self, name: &str) -> Result<UnitStatus>;

    /// Starts a unit.
    ///
    /// Returns once the start request is accepted by the service manager,
    /// not once the unit is active.
    async fn start_unit(&self, name: &str, mode: UnitStartMode, timeout: Duration) -> Result<()>;

    /// Stops a unit.
    async fn stop_unit(&self, name: &str, mode: UnitStartMode, timeout: Duration) -> Result<()>;

    /// Resets the failed state of a unit.
    async fn reset_failed_unit(&self, name: &str) -> Result<()>;
}
