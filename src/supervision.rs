//! systemd supervision: reboot requests and post-update health checks.
//!
//! Two small stateless services built on the shared [`SystemdConn`]
//! handle. [`SystemdRebooter`] drives the host into a reboot;
//! [`SystemdUpdateChecker`] verifies a fixed unit set afterwards and is
//! the rollback trigger for OS updates.

use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::constants::{
    REBOOT_TARGET, SYSTEMD_CALL_TIMEOUT, UNIT_SETTLE_POLL_INTERVAL, UNIT_SETTLE_TIMEOUT,
};
use crate::error::{Error, Result};
use crate::systemd::{SystemdConn, UnitStartMode, UnitState};

/// Requests an OS reboot via the systemd reboot target.
///
/// Reboot is inherently disruptive and at-most-once, so no retries are
/// performed; a failure is reported upward for the caller to decide on
/// rollback versus re-attempt policy. The call returns once the request
/// is accepted by the service manager, not once the machine restarts.
pub struct SystemdRebooter {
    conn: Arc<dyn SystemdConn>,
}

impl SystemdRebooter {
    /// Creates a rebooter on the shared systemd connection.
    pub fn new(conn: Arc<dyn SystemdConn>) -> Self {
        Self { conn }
    }

    /// Requests a host reboot.
    pub async fn reboot(&self) -> Result<()> {
        info!("system reboot requested");

        self.conn
            .start_unit(REBOOT_TARGET, UnitStartMode::Replace, SYSTEMD_CALL_TIMEOUT)
            .await
            .map_err(|err| Error::SystemdCallFailed {
                call: format!("start_unit({})", REBOOT_TARGET),
                reason: err.to_string(),
            })
    }
}

/// Verifies a fixed set of systemd units after an update or reboot.
///
/// The unit set is configured once at construction. [`check`] succeeds
/// only when every configured unit is active; a failed unit fails the
/// check immediately, regardless of its position in the list.
///
/// [`check`]: SystemdUpdateChecker::check
pub struct SystemdUpdateChecker {
    units: Vec<String>,
    conn: Arc<dyn SystemdConn>,
}

impl SystemdUpdateChecker {
    /// Creates a checker for the given ordered unit set.
    pub fn new(units: Vec<String>, conn: Arc<dyn SystemdConn>) -> Self {
        Self { units, conn }
    }

    /// Returns the configured unit names, in order.
    pub fn units(&self) -> &[String] {
        &self.units
    }

    /// Checks aggregate unit health.
    ///
    /// Fails as soon as any unit reports a state other than active.
    /// Units still activating or deactivating are polled until they
    /// settle, bounded by a fixed deadline; a unit that never settles
    /// fails the check with its last observed state.
    pub async fn check(&self) -> Result<()> {
        debug!(units = self.units.len(), "check unit health");

        let deadline = Instant::now() + UNIT_SETTLE_TIMEOUT;

        loop {
            let mut pending: Option<(String, UnitState)> = None;

            for unit in &self.units {
                let status = self.conn.get_unit_status(unit).await.map_err(|err| {
                    error!(unit = unit.as_str(), %err, "can't get unit status");

                    Error::SystemdCallFailed {
                        call: format!("get_unit_status({})", unit),
                        reason: err.to_string(),
                    }
                })?;

                match status.state {
                    UnitState::Active => {}
                    state if state.is_transient() => {
                        if pending.is_none() {
                            pending = Some((unit.clone(), state));
                        }
                    }
                    state => {
                        return Err(Error::UpdateVerificationFailed {
                            unit: unit.clone(),
                            state: state.to_string(),
                        });
                    }
                }
            }

            let Some((unit, state)) = pending else {
                debug!("all units active");
                return Ok(());
            };

            if Instant::now() >= deadline {
                return Err(Error::UpdateVerificationFailed {
                    unit,
                    state: state.to_string(),
                });
            }

            sleep(UNIT_SETTLE_POLL_INTERVAL).await;
        }
    }
}
