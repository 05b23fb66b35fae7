//! Rootfs runtime - plain root-filesystem service instances.
//!
//! No mount or whiteout preparation: the instance is the pre-extracted
//! root filesystem the device is already running from. An update is
//! staged by the caller, recorded as pending, and applied through a host
//! reboot; the version file content after the reboot is the signal that
//! the update applied.
//!
//! After start the runtime polls the configured health-check services
//! through the systemd supervision layer. Sustained failure is surfaced
//! as an instance-health event, not a stop.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{RootfsConfig, RuntimeConfig};
use crate::constants::{HEALTH_CHECK_INTERVAL, SINGLE_INSTANCE};
use crate::error::{Error, Result};
use crate::nodeinfo::NodeInfoProvider;
use crate::runtime::{
    create_runtime_info, InstanceIdent, InstanceInfo, InstanceState, InstanceStatus,
    InstanceStatusReceiver, Runtime, RuntimeInfo,
};
use crate::supervision::{SystemdRebooter, SystemdUpdateChecker};
use crate::systemd::SystemdConn;

/// Record of the installed instance, persisted across reboots.
const INSTALLED_FILE: &str = "installed.json";

/// Record of a staged update, present only while an update is pending.
const PENDING_FILE: &str = "pending.json";

/// Persisted instance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceRecord {
    ident: InstanceIdent,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest_digest: Option<String>,
}

#[derive(Default)]
struct Records {
    current: Option<InstanceRecord>,
    pending: Option<InstanceRecord>,
}

/// Lifecycle backend for plain-rootfs service instances.
pub struct RootfsRuntime {
    runtime_type: String,
    config: RootfsConfig,
    info: RuntimeInfo,
    default_ident: InstanceIdent,
    status_receiver: Arc<dyn InstanceStatusReceiver>,
    rebooter: SystemdRebooter,
    checker: Arc<SystemdUpdateChecker>,
    records: Mutex<Records>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl RootfsRuntime {
    /// Creates a rootfs runtime from its config envelope.
    pub fn new(
        config: &RuntimeConfig,
        node_info_provider: &dyn NodeInfoProvider,
        status_receiver: Arc<dyn InstanceStatusReceiver>,
        systemd: Arc<dyn SystemdConn>,
    ) -> Result<Self> {
        debug!(runtime_type = config.runtime_type.as_str(), "init rootfs runtime");

        let parsed = RootfsConfig::parse(config)?;
        let node_info = node_info_provider.node_info()?;
        let info = create_runtime_info(&config.runtime_type, &node_info, SINGLE_INSTANCE)?;

        info!(
            runtime_id = info.runtime_id.as_str(),
            runtime_type = info.runtime_type.as_str(),
            max_instances = info.max_instances,
            "rootfs runtime info"
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
            status_receiver,
            rebooter: SystemdRebooter::new(systemd),
            checker,
            records: Mutex::new(Records::default()),
            health_task: Mutex::new(None),
        })
    }

    fn record_path(&self, file: &str) -> PathBuf {
        self.config.working_dir.join(file)
    }

    fn status(&self, ident: &InstanceIdent, state: InstanceState, version: &str) -> InstanceStatus {
        InstanceStatus::new(ident.clone(), &self.info.runtime_id, state, version)
    }

    /// Reads the active OS/service version from the version file.
    ///
    /// The file holds a single `VERSION="x.y.z"` line.
    fn current_version(&self) -> Result<String> {
        let content = std::fs::read_to_string(&self.config.version_file_path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::InstanceNotFound(format!(
                    "version file not found: {}",
                    self.config.version_file_path.display()
                ))
            } else {
                Error::Io(err)
            }
        })?;

        parse_version_line(content.lines().next().unwrap_or_default())
    }

    fn load_record(&self, path: &Path) -> Result<InstanceRecord> {
        let content = std::fs::read_to_string(path)?;

        Ok(serde_json::from_str(&content)?)
    }

    fn save_record(&self, path: &Path, record: &InstanceRecord) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(record)?)?;

        Ok(())
    }

    /// Loads or creates the installed-instance record.
    fn init_installed_record(&self) -> Result<InstanceRecord> {
        let path = self.record_path(INSTALLED_FILE);

        if !path.exists() {
            let record = InstanceRecord {
                ident: self.default_ident.clone(),
                version: self.current_version()?,
                manifest_digest: None,
            };

            self.save_record(&path, &record)?;
        }

        self.load_record(&path)
    }

    /// Resolves a pending update against the live version file.
    ///
    /// A changed version file content is the signal that the update
    /// applied; an unchanged one after a reboot means the update failed.
    fn resolve_pending(&self, current: &mut InstanceRecord, pending: InstanceRecord) -> Result<()> {
        let live_version = self.current_version()?;

        if live_version == pending.version {
            info!(version = live_version.as_str(), "rootfs update applied");

            self.save_record(&self.record_path(INSTALLED_FILE), &pending)?;
            std::fs::remove_file(self.record_path(PENDING_FILE))?;

            *current = pending;
        } else {
            warn!(
                expected = pending.version.as_str(),
                actual = live_version.as_str(),
                "rootfs update did not apply"
            );

            let err = Error::UpdateFailed {
                state: "verifying".to_string(),
                reason: format!(
                    "version file still reports {} instead of {}",
                    live_version, pending.version
                ),
            };

            self.status_receiver.on_instance_status(
                self.status(&pending.ident, InstanceState::Failed, &pending.version)
                    .with_error(&err),
            );

            std::fs::remove_file(self.record_path(PENDING_FILE))?;
        }

        Ok(())
    }

    /// Spawns the periodic health-check poll.
    fn spawn_health_check(&self, ident: InstanceIdent, version: String) -> Result<()> {
        if self.checker.units().is_empty() {
            return Ok(());
        }

        let checker = self.checker.clone();
        let receiver = self.status_receiver.clone();
        let runtime_id = self.info.runtime_id.clone();

        let handle = tokio::spawn(async move {
            let mut healthy = true;
            let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                match checker.check().await {
                    Ok(()) => {
                        if !healthy {
                            healthy = true;

                            info!(instance = %ident, "instance recovered");

                            receiver.on_instance_status(InstanceStatus::new(
                                ident.clone(),
                                &runtime_id,
                                InstanceState::Active,
                                &version,
                            ));
                        }
                    }
                    Err(err) => {
                        if healthy {
                            healthy = false;

                            warn!(instance = %ident, %err, "instance health check failed");

                            receiver.on_instance_status(
                                InstanceStatus::new(
                                    ident.clone(),
                                    &runtime_id,
                                    InstanceState::Active,
                                    &version,
                                )
                                .with_error(&err),
                            );
                        }
                    }
                }
            }
        });

        *self
            .health_task
            .lock()
            .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))? = Some(handle);

        Ok(())
    }
}

impl Drop for RootfsRuntime {
    fn drop(&mut self) {
        if let Ok(mut task) = self.health_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Runtime for RootfsRuntime {
    fn runtime_type(&self) -> &str {
        &self.runtime_type
    }

    fn runtime_info(&self) -> RuntimeInfo {
        self.info.clone()
    }

    async fn start(&self) -> Result<()> {
        debug!("start rootfs runtime");

        std::fs::create_dir_all(&self.config.working_dir)?;

        let mut current = self.init_installed_record()?;

        let pending_path = self.record_path(PENDING_FILE);
        if pending_path.exists() {
            let pending = self.load_record(&pending_path)?;
            self.resolve_pending(&mut current, pending)?;
        }

        self.status_receiver.on_instance_status(self.status(
            &current.ident,
            InstanceState::Active,
            &current.version,
        ));

        let (ident, version) = (current.ident.clone(), current.version.clone());

        {
            let mut records = self
                .records
                .lock()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;
            records.current = Some(current);
            records.pending = None;
        }

        self.spawn_health_check(ident, version)?;

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        debug!("stop rootfs runtime");

        if let Some(handle) = self
            .health_task
            .lock()
            .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?
            .take()
        {
            handle.abort();
        }

        Ok(())
    }

    /// Stages a rootfs update.
    ///
    /// The new version is recorded as pending and a reboot is requested
    /// through the status receiver; the update takes effect only after
    /// the host reboots into the new root filesystem.
    async fn start_instance(&self, instance: &InstanceInfo) -> Result<InstanceStatus> {
        debug!(instance = %instance.ident, version = instance.version.as_str(), "start instance");

        {
            let records = self
                .records
                .lock()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;

            if let Some(current) = &records.current {
                if current.ident == instance.ident
                    && current.manifest_digest == instance.manifest_digest
                {
                    let status =
                        self.status(&instance.ident, InstanceState::Active, &current.version);
                    self.status_receiver.on_instance_status(status.clone());

                    return Ok(status);
                }
            }

            // The same update staged twice awaits the same reboot.
            if let Some(pending) = &records.pending {
                if pending.version == instance.version
                    && pending.manifest_digest == instance.manifest_digest
                {
                    return Ok(self.status(
                        &instance.ident,
                        InstanceState::Activating,
                        &instance.version,
                    ));
                }
            }
        }

        self.status_receiver.on_instance_status(self.status(
            &instance.ident,
            InstanceState::Activating,
            &instance.version,
        ));

        let record = InstanceRecord {
            ident: instance.ident.clone(),
            version: instance.version.clone(),
            manifest_digest: instance.manifest_digest.clone(),
        };

        let result = self
            .save_record(&self.record_path(PENDING_FILE), &record)
            .and_then(|()| self.status_receiver.reboot_required(&self.info.runtime_id));

        if let Err(err) = result {
            let _ = std::fs::remove_file(self.record_path(PENDING_FILE));

            let status = self
                .status(&instance.ident, InstanceState::Activating, &instance.version)
                .with_error(&err);
            self.status_receiver.on_instance_status(status);

            return Err(err);
        }

        {
            let mut records = self
                .records
                .lock()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;
            records.pending = Some(record);
        }

        Ok(self.status(&instance.ident, InstanceState::Activating, &instance.version))
    }

    async fn stop_instance(&self, ident: &InstanceIdent, _remove: bool) -> Result<InstanceStatus> {
        debug!(instance = %ident, "stop instance");

        let version = {
            let records = self
                .records
                .lock()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;

            records
                .current
                .as_ref()
                .map(|record| record.version.clone())
                .unwrap_or_default()
        };

        let status = self.status(ident, InstanceState::Inactive, &version);
        self.status_receiver.on_instance_status(status.clone());

        Ok(status)
    }

    async fn reboot(&self) -> Result<()> {
        debug!("reboot rootfs runtime");

        self.rebooter.reboot().await
    }
}

/// Parses a `VERSION="x.y.z"` line.
fn parse_version_line(line: &str) -> Result<String> {
    let mut parts = line.splitn(2, '=');

    let key = parts.next().unwrap_or_default().trim();
    let value = parts.next();

    let (Some(value), "VERSION") = (value, key) else {
        return Err(Error::InvalidArgument(format!(
            "invalid version file format: {}",
            line
        )));
    };

    Ok(value.trim().trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_line() {
        assert_eq!(parse_version_line("VERSION=\"5.1.0\"").unwrap(), "5.1.0");
        assert_eq!(parse_version_line("VERSION=5.1.0").unwrap(), "5.1.0");
        assert_eq!(parse_version_line("VERSION = \"2.0\"").unwrap(), "2.0");
        assert!(parse_version_line("NAME=\"edge\"").is_err());
        assert!(parse_version_line("").is_err());
    }
}
