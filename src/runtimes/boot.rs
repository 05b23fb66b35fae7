//! Boot runtime - whole-device dual-partition (A/B) OS image updates.
//!
//! Composes the partition manager, the bootloader controller, the
//! systemd rebooter, and the update checker into one atomic update
//! sequence. The sequence cannot be made atomic at the OS level, so it
//! is modelled as an explicit state machine persisted across the reboot:
//!
//! ```text
//! Idle → SlotSelected → ImageWritten → Rebooting → Verifying → Committed
//!                                                        └───→ RolledBack
//! ```
//!
//! A failure before the bootloader slot-pointer flip leaves the previous
//! slot bootable; the flip is the last durable write before reboot.
//! Failed verification after the reboot flips the pointer back and
//! reboots again. That rollback is the only automatic retry in the
//! subsystem and is attempted at most once: a pending update that was
//! already rolled back resolves to failed without another flip.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{BootConfig, RuntimeConfig};
use crate::constants::SINGLE_INSTANCE;
use crate::error::{Error, Result};
use crate::nodeinfo::NodeInfoProvider;
use crate::partition::PartitionManager;
use crate::runtime::{
    create_runtime_info, InstanceIdent, InstanceInfo, InstanceState, InstanceStatus,
    InstanceStatusReceiver, Runtime, RuntimeInfo,
};
use crate::supervision::{SystemdRebooter, SystemdUpdateChecker};
use crate::systemd::SystemdConn;

/// Record of the installed OS image, persisted across reboots.
const INSTALLED_FILE: &str = "installed.json";

/// Record of an in-flight update, present from slot flip to commit.
const PENDING_FILE: &str = "pending.json";

// =============================================================================
// Boot Controller Contract
// =============================================================================

/// Bootloader controller.
///
/// External collaborator owning the platform-specific active-slot
/// pointer (EFI variables, U-Boot environment). Slot indices refer to
/// positions in [`partition_devices`].
///
/// [`partition_devices`]: BootController::partition_devices
pub trait BootController: Send + Sync {
    /// Returns the configured boot partition devices.
    fn partition_devices(&self) -> Result<Vec<PathBuf>>;

    /// Returns the slot index the device currently runs from.
    fn current_boot(&self) -> Result<usize>;

    /// Returns the slot index selected for the next boot.
    fn main_boot(&self) -> Result<usize>;

    /// Points the bootloader at a slot for the next boot.
    fn set_main_boot(&self, index: usize) -> Result<()>;

    /// Marks the current boot as successful.
    fn set_boot_ok(&self) -> Result<()>;
}

// =============================================================================
// Update State Machine
// =============================================================================

/// State of the A/B update sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateState {
    /// No update in flight.
    Idle,
    /// Inactive slot resolved from the current root device.
    SlotSelected,
    /// New OS image written to the inactive slot.
    ImageWritten,
    /// Reboot requested with the slot pointer flipped.
    Rebooting,
    /// Post-reboot unit health verification in progress.
    Verifying,
    /// Update verified; slot flip is permanent.
    Committed,
    /// Verification failed; previous slot restored.
    RolledBack,
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::SlotSelected => write!(f, "slot selected"),
            Self::ImageWritten => write!(f, "image written"),
            Self::Rebooting => write!(f, "rebooting"),
            Self::Verifying => write!(f, "verifying"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// Persisted record of an in-flight update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRecord {
    ident: InstanceIdent,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest_digest: Option<String>,
    prev_boot: usize,
    new_boot: usize,
    rolled_back: bool,
}

/// Persisted record of the installed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstalledRecord {
    ident: InstanceIdent,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest_digest: Option<String>,
}

// =============================================================================
// Boot Runtime
// =============================================================================

/// Lifecycle backend for whole-device OS image replacement.
pub struct BootRuntime {
    runtime_type: String,
    config: BootConfig,
    info: RuntimeInfo,
    default_ident: InstanceIdent,
    partition_manager: PartitionManager,
    controller: Arc<dyn BootController>,
    rebooter: SystemdRebooter,
    checker: Arc<SystemdUpdateChecker>,
    status_receiver: Arc<dyn InstanceStatusReceiver>,
    state: Mutex<UpdateState>,
    installed: Mutex<Option<InstalledRecord>>,
}

impl BootRuntime {
    /// Creates a boot runtime from its config envelope.
    pub fn new(
        config: &RuntimeConfig,
        node_info_provider: &dyn NodeInfoProvider,
        controller: Arc<dyn BootController>,
        status_receiver: Arc<dyn InstanceStatusReceiver>,
        systemd: Arc<dyn SystemdConn>,
    ) -> Result<Self> {
        debug!(runtime_type = config.runtime_type.as_str(), "init boot runtime");

        let parsed = BootConfig::parse(config)?;
        let node_info = node_info_provider.node_info()?;
        let info = create_runtime_info(&config.runtime_type, &node_info, SINGLE_INSTANCE)?;

        info!(
            runtime_id = info.runtime_id.as_str(),
            runtime_type = info.runtime_type.as_str(),
            max_instances = info.max_instances,
            "boot runtime info"
        );

        let default_ident = InstanceIdent {
            service_id: config.runtime_type.clone(),
            subject_id: node_info.node_type.clone(),
            instance: 0,
        };

        let checker = Arc::new(SystemdUpdateChecker::new(
            parsed.health_check_services.clone(),
            systemd.clone(),
        ));

        Ok(Self {
            runtime_type: config.runtime_type.clone(),
            config: parsed,
            info,
            default_ident,
            partition_manager: PartitionManager::new(),
            controller,
            rebooter: SystemdRebooter::new(systemd),
            checker,
            status_receiver,
            state: Mutex::new(UpdateState::Idle),
            installed: Mutex::new(None),
        })
    }

    /// Returns the current update state.
    pub fn update_state(&self) -> UpdateState {
        *self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn set_state(&self, state: UpdateState) {
        debug!(state = %state, "update state");

        *self.state.lock().unwrap_or_else(|err| err.into_inner()) = state;
    }

    fn record_path(&self, file: &str) -> PathBuf {
        self.config.working_dir.join(file)
    }

    fn version_file_path(&self) -> PathBuf {
        if self.config.version_file.is_absolute() {
            self.config.version_file.clone()
        } else {
            self.config.working_dir.join(&self.config.version_file)
        }
    }

    fn status(&self, ident: &InstanceIdent, state: InstanceState, version: &str) -> InstanceStatus {
        InstanceStatus::new(ident.clone(), &self.info.runtime_id, state, version)
    }

    fn load_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = std::fs::read_to_string(path)?;

        Ok(serde_json::from_str(&content)?)
    }

    fn save_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(value)?)?;

        Ok(())
    }

    /// Loads or creates the installed-image record.
    fn init_installed_record(&self) -> Result<InstalledRecord> {
        let path = self.record_path(INSTALLED_FILE);

        if !path.exists() {
            let version = match std::fs::read_to_string(self.version_file_path()) {
                Ok(content) => {
                    parse_image_version(content.lines().next().unwrap_or_default())?
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(err) => return Err(err.into()),
            };

            self.save_json(
                &path,
                &InstalledRecord {
                    ident: self.default_ident.clone(),
                    version,
                    manifest_digest: None,
                },
            )?;
        }

        self.load_json(&path)
    }

    /// Resolves a pending update found at startup, after the reboot.
    async fn verify_pending(
        &self,
        installed: &mut InstalledRecord,
        pending: UpdateRecord,
    ) -> Result<()> {
        let pending_path = self.record_path(PENDING_FILE);

        // An update that was already rolled back once is terminal;
        // flipping again would start a flip-flop loop.
        if pending.rolled_back {
            warn!(version = pending.version.as_str(), "update rolled back, requires manual intervention");

            let err = Error::UpdateFailed {
                state: UpdateState::RolledBack.to_string(),
                reason: "verification failed after rollback".to_string(),
            };

            self.status_receiver.on_instance_status(
                self.status(&pending.ident, InstanceState::Failed, &pending.version)
                    .with_error(&err),
            );

            std::fs::remove_file(&pending_path)?;
            self.set_state(UpdateState::RolledBack);

            return Ok(());
        }

        self.set_state(UpdateState::Verifying);

        info!(version = pending.version.as_str(), "verifying update");

        match self.checker.check().await {
            Ok(()) => {
                self.controller.set_boot_ok().map_err(|err| Error::UpdateFailed {
                    state: UpdateState::Verifying.to_string(),
                    reason: format!("can't mark boot successful: {}", err),
                })?;

                let record = InstalledRecord {
                    ident: pending.ident.clone(),
                    version: pending.version.clone(),
                    manifest_digest: pending.manifest_digest.clone(),
                };

                self.save_json(&self.record_path(INSTALLED_FILE), &record)?;
                std::fs::remove_file(&pending_path)?;

                *installed = record;

                info!(version = pending.version.as_str(), "update committed");

                self.set_state(UpdateState::Committed);
            }
            Err(err) => {
                error!(%err, "update verification failed, rolling back");

                self.controller.set_main_boot(pending.prev_boot).map_err(|flip_err| {
                    Error::UpdateFailed {
                        state: UpdateState::Verifying.to_string(),
                        reason: format!("can't restore previous slot: {}", flip_err),
                    }
                })?;

                let mut record = pending;
                record.rolled_back = true;
                self.save_json(&pending_path, &record)?;

                self.status_receiver.on_instance_status(
                    self.status(&record.ident, InstanceState::Failed, &record.version)
                        .with_error(&err),
                );

                self.set_state(UpdateState::RolledBack);

                self.rebooter.reboot().await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Runtime for BootRuntime {
    fn runtime_type(&self) -> &str {
        &self.runtime_type
    }

    fn runtime_info(&self) -> RuntimeInfo {
        self.info.clone()
    }

    async fn start(&self) -> Result<()> {
        debug!("start boot runtime");

        std::fs::create_dir_all(&self.config.working_dir)?;

        let mut installed = self.init_installed_record()?;

        let pending_path = self.record_path(PENDING_FILE);
        if pending_path.exists() {
            let pending: UpdateRecord = self.load_json(&pending_path)?;
            self.verify_pending(&mut installed, pending).await?;
        }

        self.status_receiver.on_instance_status(self.status(
            &installed.ident,
            InstanceState::Active,
            &installed.version,
        ));

        *self
            .installed
            .lock()
            .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))? = Some(installed);

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        debug!("stop boot runtime");

        Ok(())
    }

    /// Applies a whole-device OS update.
    ///
    /// Drives `Idle → SlotSelected → ImageWritten → Rebooting`; the
    /// remaining states run on the next agent start, after the reboot.
    /// Any failure before the reboot request returns the sequence to
    /// idle with the previous slot still bootable.
    async fn start_instance(&self, instance: &InstanceInfo) -> Result<InstanceStatus> {
        debug!(instance = %instance.ident, version = instance.version.as_str(), "start instance");

        let Some(image_path) = &instance.image_path else {
            return Err(Error::InvalidArgument(format!(
                "instance {} carries no OS image",
                instance.ident
            )));
        };

        {
            let installed = self
                .installed
                .lock()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;

            if let Some(installed) = installed.as_ref() {
                if installed.version == instance.version
                    && installed.manifest_digest == instance.manifest_digest
                {
                    let status =
                        self.status(&instance.ident, InstanceState::Active, &installed.version);
                    self.status_receiver.on_instance_status(status.clone());

                    return Ok(status);
                }
            }
        }

        self.status_receiver.on_instance_status(self.status(
            &instance.ident,
            InstanceState::Activating,
            &instance.version,
        ));

        let result = self.run_update(instance, image_path).await;

        match result {
            Ok(status) => Ok(status),
            Err(err) => {
                self.set_state(UpdateState::Idle);

                self.status_receiver.on_instance_status(
                    self.status(&instance.ident, InstanceState::Activating, &instance.version)
                        .with_error(&err),
                );

                Err(err)
            }
        }
    }

    async fn stop_instance(&self, ident: &InstanceIdent, _remove: bool) -> Result<InstanceStatus> {
        debug!(instance = %ident, "stop instance");

        let version = {
            let installed = self
                .installed
                .lock()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;

            installed
                .as_ref()
                .map(|record| record.version.clone())
                .unwrap_or_default()
        };

        let status = self.status(ident, InstanceState::Inactive, &version);
        self.status_receiver.on_instance_status(status.clone());

        Ok(status)
    }

    async fn reboot(&self) -> Result<()> {
        debug!("reboot boot runtime");

        self.rebooter.reboot().await
    }
}

impl BootRuntime {
    /// Runs the pre-reboot half of the update sequence.
    async fn run_update(&self, instance: &InstanceInfo, image_path: &Path) -> Result<InstanceStatus> {
        // SlotSelected: resolve the inactive slot from the slot the
        // device currently runs from.
        let devices = self.controller.partition_devices()?;
        let current_boot = self.controller.current_boot()?;

        let current_device = devices.get(current_boot).ok_or_else(|| Error::UpdateFailed {
            state: UpdateState::Idle.to_string(),
            reason: format!("current boot index {} out of range", current_boot),
        })?;

        let inactive = self
            .partition_manager
            .select_inactive_slot(&current_device.to_string_lossy(), &devices)?;

        let new_boot = devices
            .iter()
            .position(|device| *device == inactive.device)
            .ok_or_else(|| Error::UpdateFailed {
                state: UpdateState::SlotSelected.to_string(),
                reason: format!(
                    "inactive slot {} not among configured partitions",
                    inactive.device.display()
                ),
            })?;

        self.set_state(UpdateState::SlotSelected);

        info!(
            slot = %inactive.device.display(),
            partition = inactive.partition_number,
            "inactive slot selected"
        );

        // ImageWritten: stream the image to the inactive slot's raw
        // device. A write failure returns to idle, no reboot attempted.
        self.partition_manager
            .install_image(image_path, &inactive.device)
            .await
            .map_err(|err| Error::UpdateFailed {
                state: UpdateState::SlotSelected.to_string(),
                reason: format!("image write: {}", err),
            })?;

        self.set_state(UpdateState::ImageWritten);

        // The slot-pointer flip must be the last durable write before
        // the reboot: persist the update record first, flip after.
        let record = UpdateRecord {
            ident: instance.ident.clone(),
            version: instance.version.clone(),
            manifest_digest: instance.manifest_digest.clone(),
            prev_boot: current_boot,
            new_boot,
            rolled_back: false,
        };

        let pending_path = self.record_path(PENDING_FILE);
        self.save_json(&pending_path, &record)?;

        if let Err(err) = self.controller.set_main_boot(new_boot) {
            let _ = std::fs::remove_file(&pending_path);

            return Err(Error::UpdateFailed {
                state: UpdateState::ImageWritten.to_string(),
                reason: format!("can't flip boot slot: {}", err),
            });
        }

        self.set_state(UpdateState::Rebooting);

        if let Err(err) = self.rebooter.reboot().await {
            // No reboot happened; restore the pointer so an unverified
            // image cannot be booted by an unrelated power cycle.
            if let Err(restore_err) = self.controller.set_main_boot(current_boot) {
                error!(%restore_err, "can't restore boot slot after failed reboot request");
            }

            let _ = std::fs::remove_file(&pending_path);

            return Err(Error::UpdateFailed {
                state: UpdateState::Rebooting.to_string(),
                reason: format!("reboot request: {}", err),
            });
        }

        Ok(self.status(&instance.ident, InstanceState::Activating, &instance.version))
    }
}

/// Parses the boot image version file content (bare version string).
fn parse_image_version(line: &str) -> Result<String> {
    let version = line.trim().trim_matches('"');

    if version.is_empty() {
        return Err(Error::InvalidArgument(
            "empty boot version file".to_string(),
        ));
    }

    Ok(version.to_string())
}
