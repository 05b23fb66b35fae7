//! Tests for systemd supervision: rebooter and update checker.
//!
//! Uses a mock systemd connection to validate the reboot request wire
//! parameters and the aggregate health verdict over configured units.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use edgerun::constants::SYSTEMD_CALL_TIMEOUT;
use edgerun::error::{Error, ErrorKind, Result};
use edgerun::{SystemdConn, SystemdRebooter, SystemdUpdateChecker, UnitStartMode, UnitState, UnitStatus};

// =============================================================================
// Mock systemd Connection
// =============================================================================

#[derive(Default)]
struct MockSystemdConn {
    /// Unit states returned by get_unit_status.
    states: Mutex<HashMap<String, UnitState>>,
    /// Recorded start_unit calls: (unit, mode, timeout).
    started: Mutex<Vec<(String, String, Duration)>>,
    /// Recorded get_unit_status calls, in order.
    queries: Mutex<Vec<String>>,
    /// When set, start_unit fails with this reason.
    start_error: Mutex<Option<String>>,
    /// Calls after which an activating unit flips to active.
    settle_after: AtomicUsize,
}

impl MockSystemdConn {
    fn with_states(states: &[(&str, UnitState)]) -> Arc<Self> {
        let conn = Self::default();

        *conn.states.lock().unwrap() = states
            .iter()
            .map(|(name, state)| (name.to_string(), *state))
            .collect();

        Arc::new(conn)
    }
}

#[async_trait]
impl SystemdConn for MockSystemdConn {
    async fn list_units(&self) -> Result<Vec<UnitStatus>> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .iter()
            .map(|(name, state)| UnitStatus {
                name: name.clone(),
                state: *state,
                exit_code: None,
            })
            .collect())
    }

    async fn get_unit_status(&self, name: &str) -> Result<UnitStatus> {
        self.queries.lock().unwrap().push(name.to_string());

        let mut states = self.states.lock().unwrap();
        let state = states
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;

        // Simulate a unit settling after a few polls.
        if state == UnitState::Activating {
            let remaining = self.settle_after.load(Ordering::SeqCst);
            if remaining <= 1 {
                states.insert(name.to_string(), UnitState::Active);
            } else {
                self.settle_after.store(remaining - 1, Ordering::SeqCst);
            }
        }

        Ok(UnitStatus {
            name: name.to_string(),
            state,
            exit_code: None,
        })
    }

    async fn start_unit(&self, name: &str, mode: UnitStartMode, timeout: Duration) -> Result<()> {
        if let Some(reason) = self.start_error.lock().unwrap().clone() {
            return Err(Error::SystemdCallFailed {
                call: format!("start_unit({})", name),
                reason,
            });
        }

        self.started
            .lock()
            .unwrap()
            .push((name.to_string(), mode.to_string(), timeout));

        Ok(())
    }

    async fn stop_unit(&self, _name: &str, _mode: UnitStartMode, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn reset_failed_unit(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// SystemdRebooter Tests
// =============================================================================

#[tokio::test]
async fn test_reboot_starts_reboot_target() {
    let conn = MockSystemdConn::with_states(&[]);
    let rebooter = SystemdRebooter::new(conn.clone());

    rebooter.reboot().await.unwrap();

    let started = conn.started.lock().unwrap();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].0, "reboot.target");
    assert_eq!(started[0].1, "replace");
    assert_eq!(started[0].2, SYSTEMD_CALL_TIMEOUT);
}

#[tokio::test]
async fn test_reboot_propagates_connection_error() {
    let conn = MockSystemdConn::with_states(&[]);
    *conn.start_error.lock().unwrap() = Some("connection refused".to_string());

    let rebooter = SystemdRebooter::new(conn.clone());
    let err = rebooter.reboot().await.unwrap_err();

    assert!(matches!(err, Error::SystemdCallFailed { .. }));
    assert!(err.to_string().contains("connection refused"));
    // No retries: no further start request was issued.
    assert!(conn.started.lock().unwrap().is_empty());
}

// =============================================================================
// SystemdUpdateChecker Tests
// =============================================================================

fn units(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn test_check_all_units_active() {
    let conn = MockSystemdConn::with_states(&[
        ("a.service", UnitState::Active),
        ("b.service", UnitState::Active),
        ("c.service", UnitState::Active),
    ]);

    let checker = SystemdUpdateChecker::new(units(&["a.service", "b.service", "c.service"]), conn);
    checker.check().await.unwrap();
}

#[tokio::test]
async fn test_check_empty_unit_set() {
    let conn = MockSystemdConn::with_states(&[]);
    let checker = SystemdUpdateChecker::new(Vec::new(), conn);

    checker.check().await.unwrap();
}

#[tokio::test]
async fn test_check_fails_on_failed_unit_regardless_of_position() {
    for failed_index in 0..3 {
        let names = ["a.service", "b.service", "c.service"];
        let states: Vec<(&str, UnitState)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let state = if i == failed_index {
                    UnitState::Failed
                } else {
                    UnitState::Active
                };
                (*name, state)
            })
            .collect();

        let conn = MockSystemdConn::with_states(&states);
        let checker = SystemdUpdateChecker::new(units(&names), conn);

        let err = checker.check().await.unwrap_err();
        assert!(matches!(err, Error::UpdateVerificationFailed { .. }));
        assert_eq!(err.kind(), ErrorKind::Failed);
        assert!(err.to_string().contains(names[failed_index]));
    }
}

#[tokio::test]
async fn test_check_fails_fast_on_first_failed_unit() {
    let conn = MockSystemdConn::with_states(&[
        ("a.service", UnitState::Failed),
        ("b.service", UnitState::Active),
    ]);

    let checker =
        SystemdUpdateChecker::new(units(&["a.service", "b.service"]), conn.clone());
    checker.check().await.unwrap_err();

    // The failed first unit short-circuits the remaining queries.
    assert_eq!(*conn.queries.lock().unwrap(), vec!["a.service".to_string()]);
}

#[tokio::test]
async fn test_check_fails_on_inactive_unit() {
    let conn = MockSystemdConn::with_states(&[
        ("a.service", UnitState::Active),
        ("b.service", UnitState::Inactive),
    ]);

    let checker = SystemdUpdateChecker::new(units(&["a.service", "b.service"]), conn);

    let err = checker.check().await.unwrap_err();
    assert!(err.to_string().contains("b.service"));
    assert!(err.to_string().contains("inactive"));
}

#[tokio::test(start_paused = true)]
async fn test_check_waits_for_activating_unit_to_settle() {
    let conn = MockSystemdConn::with_states(&[
        ("a.service", UnitState::Active),
        ("b.service", UnitState::Activating),
    ]);
    conn.settle_after.store(3, Ordering::SeqCst);

    let checker = SystemdUpdateChecker::new(units(&["a.service", "b.service"]), conn);
    checker.check().await.unwrap();
}

#[tokio::test]
async fn test_check_unknown_unit_fails() {
    let conn = MockSystemdConn::with_states(&[("a.service", UnitState::Active)]);
    let checker = SystemdUpdateChecker::new(units(&["a.service", "ghost.service"]), conn);

    let err = checker.check().await.unwrap_err();
    assert!(matches!(err, Error::SystemdCallFailed { .. }));
}
