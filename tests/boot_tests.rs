//! Tests for the boot runtime A/B update state machine.
//!
//! Drives the full update sequence against temp-file slot devices and a
//! mock bootloader controller: slot selection, image write, pointer
//! flip, reboot request, and the post-reboot verify/commit/rollback
//! resolution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use edgerun::error::{Error, ErrorKind, Result};
use edgerun::{
    BootController, BootRuntime, CpuInfo, InstanceIdent, InstanceInfo, InstanceState,
    InstanceStatus, InstanceStatusReceiver, NodeInfo, NodeInfoProvider, OsInfo, Runtime,
    RuntimeConfig, SystemdConn, UnitStartMode, UnitState, UnitStatus, UpdateState,
};

// =============================================================================
// Mock Collaborators
// =============================================================================

struct MockBootController {
    devices: Vec<PathBuf>,
    current: Mutex<usize>,
    main: Mutex<usize>,
    main_history: Mutex<Vec<usize>>,
    boot_ok: Mutex<bool>,
}

impl MockBootController {
    fn new(devices: Vec<PathBuf>, current: usize) -> Arc<Self> {
        Arc::new(Self {
            devices,
            current: Mutex::new(current),
            main: Mutex::new(current),
            main_history: Mutex::new(Vec::new()),
            boot_ok: Mutex::new(false),
        })
    }
}

impl BootController for MockBootController {
    fn partition_devices(&self) -> Result<Vec<PathBuf>> {
        Ok(self.devices.clone())
    }

    fn current_boot(&self) -> Result<usize> {
        Ok(*self.current.lock().unwrap())
    }

    fn main_boot(&self) -> Result<usize> {
        Ok(*self.main.lock().unwrap())
    }

    fn set_main_boot(&self, index: usize) -> Result<()> {
        *self.main.lock().unwrap() = index;
        self.main_history.lock().unwrap().push(index);

        Ok(())
    }

    fn set_boot_ok(&self) -> Result<()> {
        *self.boot_ok.lock().unwrap() = true;

        Ok(())
    }
}

#[derive(Default)]
struct MockSystemdConn {
    states: Mutex<HashMap<String, UnitState>>,
    started: Mutex<Vec<String>>,
}

impl MockSystemdConn {
    fn with_unit(name: &str, state: UnitState) -> Arc<Self> {
        let conn = Self::default();
        conn.states.lock().unwrap().insert(name.to_string(), state);

        Arc::new(conn)
    }
}

#[async_trait]
impl SystemdConn for MockSystemdConn {
    async fn list_units(&self) -> Result<Vec<UnitStatus>> {
        Ok(Vec::new())
    }

    async fn get_unit_status(&self, name: &str) -> Result<UnitStatus> {
        let state = self
            .states
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;

        Ok(UnitStatus {
            name: name.to_string(),
            state,
            exit_code: None,
        })
    }

    async fn start_unit(&self, name: &str, _mode: UnitStartMode, _timeout: Duration) -> Result<()> {
        self.started.lock().unwrap().push(name.to_string());

        Ok(())
    }

    async fn stop_unit(&self, _name: &str, _mode: UnitStartMode, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn reset_failed_unit(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct CollectingReceiver {
    statuses: Mutex<Vec<InstanceStatus>>,
}

impl InstanceStatusReceiver for CollectingReceiver {
    fn on_instance_status(&self, status: InstanceStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn reboot_required(&self, _runtime_id: &str) -> Result<()> {
        Ok(())
    }
}

struct StaticNodeInfo;

impl NodeInfoProvider for StaticNodeInfo {
    fn node_info(&self) -> Result<NodeInfo> {
        Ok(NodeInfo {
            node_id: "node0".to_string(),
            node_type: "main".to_string(),
            cpus: vec![CpuInfo {
                model_name: "test".to_string(),
                num_cores: 4,
                num_threads: 4,
                arch: "x86_64".to_string(),
                arch_family: None,
            }],
            os_info: OsInfo {
                os: "linux".to_string(),
                os_version: None,
            },
        })
    }
}

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    root: tempfile::TempDir,
    controller: Arc<MockBootController>,
    receiver: Arc<CollectingReceiver>,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();

        let slot_a = root.path().join("sda1");
        let slot_b = root.path().join("sda2");
        std::fs::write(&slot_a, "OS-IMAGE-A").unwrap();
        std::fs::write(&slot_b, "OS-IMAGE-B").unwrap();

        let controller = MockBootController::new(vec![slot_a, slot_b], 0);

        Self {
            root,
            controller,
            receiver: Arc::new(CollectingReceiver::default()),
        }
    }

    fn image(&self, content: &str) -> PathBuf {
        let path = self.root.path().join("update.img");
        std::fs::write(&path, content).unwrap();

        path
    }

    fn runtime(&self, conn: Arc<MockSystemdConn>) -> BootRuntime {
        let config = RuntimeConfig {
            is_component: true,
            plugin: "boot".to_string(),
            runtime_type: "boot".to_string(),
            working_dir: self.root.path().to_path_buf(),
            config: json!({
                "workingDir": self.root.path().join("work"),
                "partitions": [
                    self.root.path().join("sda1"),
                    self.root.path().join("sda2"),
                ],
                "healthCheckServices": ["os.service"],
            }),
        };

        BootRuntime::new(
            &config,
            &StaticNodeInfo,
            self.controller.clone(),
            self.receiver.clone(),
            conn,
        )
        .unwrap()
    }

    fn slot_content(&self, name: &str) -> String {
        std::fs::read_to_string(self.root.path().join(name)).unwrap()
    }

    fn pending_exists(&self) -> bool {
        self.root.path().join("work/pending.json").exists()
    }
}

fn os_instance(version: &str, image: Option<PathBuf>) -> InstanceInfo {
    InstanceInfo {
        ident: InstanceIdent {
            service_id: "boot".to_string(),
            subject_id: "main".to_string(),
            instance: 0,
        },
        uid: 0,
        gid: 0,
        priority: 0,
        version: version.to_string(),
        manifest_digest: Some(format!("sha256:{}", version)),
        layers: Vec::new(),
        mounts: Vec::new(),
        image_path: image,
    }
}

// =============================================================================
// Pre-Reboot Sequence Tests
// =============================================================================

#[tokio::test]
async fn test_update_writes_image_and_flips_slot() {
    let fixture = Fixture::new();
    let conn = Arc::new(MockSystemdConn::default());
    let runtime = fixture.runtime(conn.clone());

    runtime.start().await.unwrap();

    let image = fixture.image("OS-IMAGE-NEW");
    let status = runtime
        .start_instance(&os_instance("5.0.0", Some(image)))
        .await
        .unwrap();

    assert_eq!(status.state, InstanceState::Activating);
    assert_eq!(runtime.update_state(), UpdateState::Rebooting);

    // The image landed on the inactive slot; the active slot is intact.
    assert_eq!(fixture.slot_content("sda2"), "OS-IMAGE-NEW");
    assert_eq!(fixture.slot_content("sda1"), "OS-IMAGE-A");

    // The pointer was flipped to the new slot and the reboot requested.
    assert_eq!(*fixture.controller.main_history.lock().unwrap(), vec![1]);
    assert_eq!(*conn.started.lock().unwrap(), vec!["reboot.target".to_string()]);

    // The update record survives the reboot.
    assert!(fixture.pending_exists());
}

#[tokio::test]
async fn test_update_without_image_fails() {
    let fixture = Fixture::new();
    let runtime = fixture.runtime(Arc::new(MockSystemdConn::default()));

    runtime.start().await.unwrap();

    let err = runtime
        .start_instance(&os_instance("5.0.0", None))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(runtime.update_state(), UpdateState::Idle);
}

#[tokio::test]
async fn test_image_write_failure_returns_to_idle() {
    let fixture = Fixture::new();
    let conn = Arc::new(MockSystemdConn::default());
    let runtime = fixture.runtime(conn.clone());

    runtime.start().await.unwrap();

    let missing_image = fixture.root.path().join("missing.img");
    let err = runtime
        .start_instance(&os_instance("5.0.0", Some(missing_image)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UpdateFailed { .. }));
    assert_eq!(runtime.update_state(), UpdateState::Idle);

    // No pointer flip and no reboot were attempted.
    assert!(fixture.controller.main_history.lock().unwrap().is_empty());
    assert!(conn.started.lock().unwrap().is_empty());
    assert!(!fixture.pending_exists());
}

// =============================================================================
// Post-Reboot Verification Tests
// =============================================================================

async fn stage_update(fixture: &Fixture) {
    let conn = Arc::new(MockSystemdConn::default());
    let runtime = fixture.runtime(conn);

    runtime.start().await.unwrap();

    let image = fixture.image("OS-IMAGE-NEW");
    runtime
        .start_instance(&os_instance("5.0.0", Some(image)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_healthy_units_commit_update() {
    let fixture = Fixture::new();
    stage_update(&fixture).await;

    // Device "rebooted" into the new slot; all critical units healthy.
    *fixture.controller.current.lock().unwrap() = 1;

    let conn = MockSystemdConn::with_unit("os.service", UnitState::Active);
    let runtime = fixture.runtime(conn.clone());

    runtime.start().await.unwrap();

    assert_eq!(runtime.update_state(), UpdateState::Committed);
    assert!(*fixture.controller.boot_ok.lock().unwrap());
    assert!(!fixture.pending_exists());

    // No rollback reboot was requested.
    assert!(conn.started.lock().unwrap().is_empty());

    // The new version is reported active.
    let statuses = fixture.receiver.statuses.lock().unwrap();
    let last = statuses.last().unwrap();
    assert_eq!(last.state, InstanceState::Active);
    assert_eq!(last.version, "5.0.0");
}

#[tokio::test]
async fn test_unhealthy_unit_rolls_back() {
    let fixture = Fixture::new();
    stage_update(&fixture).await;

    *fixture.controller.current.lock().unwrap() = 1;

    let conn = MockSystemdConn::with_unit("os.service", UnitState::Failed);
    let runtime = fixture.runtime(conn.clone());

    runtime.start().await.unwrap();

    assert_eq!(runtime.update_state(), UpdateState::RolledBack);

    // The active-slot pointer is restored to the pre-update slot and a
    // reboot back into it is requested.
    assert_eq!(
        *fixture.controller.main_history.lock().unwrap(),
        vec![1, 0]
    );
    assert_eq!(*fixture.controller.main.lock().unwrap(), 0);
    assert_eq!(*conn.started.lock().unwrap(), vec!["reboot.target".to_string()]);

    // The failed update is reported.
    let statuses = fixture.receiver.statuses.lock().unwrap();
    let failed = statuses
        .iter()
        .find(|status| status.state == InstanceState::Failed)
        .unwrap();
    assert_eq!(failed.version, "5.0.0");

    // The record remains, marked rolled back, for the next start.
    assert!(fixture.pending_exists());
}

#[tokio::test]
async fn test_second_failed_verification_is_terminal() {
    let fixture = Fixture::new();
    stage_update(&fixture).await;

    // First post-reboot start: verification fails, rollback happens.
    *fixture.controller.current.lock().unwrap() = 1;
    {
        let conn = MockSystemdConn::with_unit("os.service", UnitState::Failed);
        let runtime = fixture.runtime(conn);
        runtime.start().await.unwrap();
    }

    // Second start, back on the old slot: the rolled-back update must
    // resolve to failed without another pointer flip (no flip-flop).
    *fixture.controller.current.lock().unwrap() = 0;

    let conn = MockSystemdConn::with_unit("os.service", UnitState::Active);
    let runtime = fixture.runtime(conn.clone());
    runtime.start().await.unwrap();

    assert_eq!(runtime.update_state(), UpdateState::RolledBack);
    assert!(!fixture.pending_exists());

    // Exactly two flips ever: to the new slot, back to the old one.
    assert_eq!(
        *fixture.controller.main_history.lock().unwrap(),
        vec![1, 0]
    );
    assert!(conn.started.lock().unwrap().is_empty());
}

// =============================================================================
// Misc Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_same_version_is_noop() {
    let fixture = Fixture::new();
    stage_update(&fixture).await;

    *fixture.controller.current.lock().unwrap() = 1;

    let conn = MockSystemdConn::with_unit("os.service", UnitState::Active);
    let runtime = fixture.runtime(conn);
    runtime.start().await.unwrap();

    // Committed 5.0.0; starting the same content again is a no-op.
    let status = runtime
        .start_instance(&os_instance("5.0.0", Some(fixture.image("OS-IMAGE-NEW"))))
        .await
        .unwrap();

    assert_eq!(status.state, InstanceState::Active);
    assert_eq!(runtime.update_state(), UpdateState::Committed);
}

#[tokio::test]
async fn test_runtime_info_single_instance() {
    let fixture = Fixture::new();
    let runtime = fixture.runtime(Arc::new(MockSystemdConn::default()));

    let info = runtime.runtime_info();
    assert_eq!(info.runtime_type, "boot");
    assert_eq!(info.max_instances, 1);
}

#[tokio::test]
async fn test_stop_instance_reports_inactive() {
    let fixture = Fixture::new();
    let runtime = fixture.runtime(Arc::new(MockSystemdConn::default()));

    runtime.start().await.unwrap();

    let status = runtime
        .stop_instance(&os_instance("1.0.0", None).ident, false)
        .await
        .unwrap();

    assert_eq!(status.state, InstanceState::Inactive);
}
