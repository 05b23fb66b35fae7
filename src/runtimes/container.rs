//! Container runtime - OCI-style isolated instances.
//!
//! Prepares the per-instance host filesystem (whiteouts, mount points,
//! layered rootfs, storage/state directories, network directory) and
//! registers the instance with monitoring. All host mutation goes through
//! the [`FileSystem`] collaborator; the runtime owns only the sequencing
//! and the failure cleanup.
//!
//! ## Start Sequence
//!
//! | # | Step | Undo on later failure |
//! |---|-----------------|------------------------------|
//! | 1 | host whiteouts | none (shared across instances) |
//! | 2 | mount points | remove instance runtime dir |
//! | 3 | rootfs mount | unmount rootfs |
//! | 4 | storage dir | remove storage dir |
//! | 5 | state dir | remove state dir |
//! | 6 | network dir | remove network dir |
//! | 7 | monitoring | unregister monitoring |
//!
//! A failed step aborts the sequence, the already-applied steps are
//! reverted best-effort in reverse order, and the returned error names
//! the failing step. Partial success is never reported as success.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{ContainerConfig, RuntimeConfig};
use crate::constants::{validate_instance_id, MAX_CONTAINER_INSTANCES};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::monitoring::{InstanceMonitoringData, Monitoring};
use crate::nodeinfo::NodeInfoProvider;
use crate::runtime::{
    create_runtime_info, InstanceIdent, InstanceInfo, InstanceState, InstanceStatus,
    InstanceStatusReceiver, Runtime, RuntimeInfo,
};

/// Subdirectory of the instance runtime dir holding the mounted rootfs.
const ROOTFS_SUBDIR: &str = "rootfs";

/// Subdirectory of the instance runtime dir holding declared mount points.
const MOUNTS_SUBDIR: &str = "mounts";

/// Subdirectory of the instance runtime dir consumed by the network
/// namespace collaborator.
const NETWORK_SUBDIR: &str = "network";

/// Bookkeeping for one running instance.
struct InstanceData {
    info: InstanceInfo,
    runtime_dir: PathBuf,
}

/// Steps of the start sequence that have host-visible effects.
///
/// Recorded as they apply so a failure can revert them in reverse order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartStep {
    Whiteouts,
    MountPoints,
    RootfsMount,
    StorageDir,
    StateDir,
    NetworkDir,
    Monitoring,
}

impl StartStep {
    fn name(&self) -> &'static str {
        match self {
            Self::Whiteouts => "whiteouts",
            Self::MountPoints => "mount points",
            Self::RootfsMount => "rootfs mount",
            Self::StorageDir => "storage dir",
            Self::StateDir => "state dir",
            Self::NetworkDir => "network dir",
            Self::Monitoring => "monitoring",
        }
    }
}

/// Lifecycle backend for OCI-style isolated instances.
pub struct ContainerRuntime {
    runtime_type: String,
    config: ContainerConfig,
    info: RuntimeInfo,
    fs: Arc<dyn FileSystem>,
    monitoring: Arc<dyn Monitoring>,
    status_receiver: Arc<dyn InstanceStatusReceiver>,
    instances: RwLock<HashMap<InstanceIdent, InstanceData>>,
}

impl ContainerRuntime {
    /// Creates a container runtime from its config envelope.
    pub fn new(
        config: &RuntimeConfig,
        node_info_provider: &dyn NodeInfoProvider,
        fs: Arc<dyn FileSystem>,
        monitoring: Arc<dyn Monitoring>,
        status_receiver: Arc<dyn InstanceStatusReceiver>,
    ) -> Result<Self> {
        debug!(runtime_type = config.runtime_type.as_str(), "init container runtime");

        let parsed = ContainerConfig::parse(config)?;
        let node_info = node_info_provider.node_info()?;
        let info = create_runtime_info(&config.runtime_type, &node_info, MAX_CONTAINER_INSTANCES)?;

        info!(
            runtime_id = info.runtime_id.as_str(),
            runtime_type = info.runtime_type.as_str(),
            arch = info.arch.as_str(),
            max_instances = info.max_instances,
            "container runtime info"
        );

        Ok(Self {
            runtime_type: config.runtime_type.clone(),
            config: parsed,
            info,
            fs,
            monitoring,
            status_receiver,
            instances: RwLock::new(HashMap::new()),
        })
    }

    fn instance_runtime_dir(&self, id: &str) -> PathBuf {
        self.config.runtime_dir.join(id)
    }

    fn storage_path(&self, id: &str) -> PathBuf {
        self.config.storage_dir.join(id)
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.config.state_dir.join(id)
    }

    fn status(&self, ident: &InstanceIdent, state: InstanceState, version: &str) -> InstanceStatus {
        InstanceStatus::new(ident.clone(), &self.info.runtime_id, state, version)
    }

    /// Runs the start sequence, recording applied steps for cleanup.
    fn run_start_sequence(
        &self,
        instance: &InstanceInfo,
        id: &str,
        applied: &mut Vec<StartStep>,
    ) -> std::result::Result<(), (StartStep, Error)> {
        let instance_dir = self.instance_runtime_dir(id);
        let rootfs_dir = instance_dir.join(ROOTFS_SUBDIR);

        self.fs
            .create_host_fs_whiteouts(&self.config.host_whiteouts_dir, &self.config.host_binds)
            .map_err(|err| (StartStep::Whiteouts, err))?;
        applied.push(StartStep::Whiteouts);

        self.fs
            .create_mount_points(&instance_dir.join(MOUNTS_SUBDIR), &instance.mounts)
            .map_err(|err| (StartStep::MountPoints, err))?;
        applied.push(StartStep::MountPoints);

        self.fs
            .mount_service_rootfs(&rootfs_dir, &instance.layers)
            .map_err(|err| (StartStep::RootfsMount, err))?;
        applied.push(StartStep::RootfsMount);

        self.fs
            .prepare_service_storage(&self.storage_path(id), instance.uid, instance.gid)
            .map_err(|err| (StartStep::StorageDir, err))?;
        applied.push(StartStep::StorageDir);

        self.fs
            .prepare_service_state(&self.state_path(id), instance.uid, instance.gid)
            .map_err(|err| (StartStep::StateDir, err))?;
        applied.push(StartStep::StateDir);

        self.fs
            .prepare_network_dir(&instance_dir.join(NETWORK_SUBDIR))
            .map_err(|err| (StartStep::NetworkDir, err))?;
        applied.push(StartStep::NetworkDir);

        self.monitoring
            .start_instance_monitoring(id, instance.uid)
            .map_err(|err| (StartStep::Monitoring, err))?;
        applied.push(StartStep::Monitoring);

        Ok(())
    }

    /// Reverts applied start steps in reverse order, best-effort.
    fn revert_start_steps(&self, id: &str, applied: &[StartStep]) {
        let instance_dir = self.instance_runtime_dir(id);

        for step in applied.iter().rev() {
            let result = match step {
                StartStep::Monitoring => self.monitoring.stop_instance_monitoring(id),
                StartStep::NetworkDir => self.fs.remove_all(&instance_dir.join(NETWORK_SUBDIR)),
                StartStep::StateDir => self.fs.remove_all(&self.state_path(id)),
                StartStep::StorageDir => self.fs.remove_all(&self.storage_path(id)),
                StartStep::RootfsMount => {
                    self.fs.umount_service_rootfs(&instance_dir.join(ROOTFS_SUBDIR))
                }
                StartStep::MountPoints => self.fs.remove_all(&instance_dir),
                StartStep::Whiteouts => Ok(()),
            };

            if let Err(err) = result {
                warn!(
                    instance = id,
                    step = step.name(),
                    %err,
                    "cleanup step failed"
                );
            }
        }
    }
}

#[async_trait]
impl Runtime for ContainerRuntime {
    fn runtime_type(&self) -> &str {
        &self.runtime_type
    }

    fn runtime_info(&self) -> RuntimeInfo {
        self.info.clone()
    }

    async fn start(&self) -> Result<()> {
        debug!("start container runtime");

        self.fs.make_dir_all(&self.config.runtime_dir)?;
        self.fs.make_dir_all(&self.config.host_whiteouts_dir)?;
        self.fs.make_dir_all(&self.config.storage_dir)?;
        self.fs.make_dir_all(&self.config.state_dir)?;

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        debug!("stop container runtime");

        let idents: Vec<InstanceIdent> = {
            let instances = self
                .instances
                .read()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;
            instances.keys().cloned().collect()
        };

        for ident in idents {
            if let Err(err) = self.stop_instance(&ident, false).await {
                warn!(instance = %ident, %err, "failed to stop instance on shutdown");
            }
        }

        Ok(())
    }

    async fn start_instance(&self, instance: &InstanceInfo) -> Result<InstanceStatus> {
        let id = instance.ident.to_string();

        debug!(instance = id.as_str(), version = instance.version.as_str(), "start instance");

        validate_instance_id(&id)?;

        {
            let instances = self
                .instances
                .read()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;

            if instances.contains_key(&instance.ident) {
                return Err(Error::InstanceAlreadyExists(id));
            }

            if instances.len() >= self.info.max_instances {
                return Err(Error::CapacityExhausted {
                    runtime: self.runtime_type.clone(),
                    max: self.info.max_instances,
                });
            }
        }

        self.status_receiver.on_instance_status(self.status(
            &instance.ident,
            InstanceState::Activating,
            &instance.version,
        ));

        let mut applied = Vec::new();

        if let Err((step, err)) = self.run_start_sequence(instance, &id, &mut applied) {
            self.revert_start_steps(&id, &applied);

            let err = Error::StartFailed {
                id: id.clone(),
                step: step.name().to_string(),
                reason: err.to_string(),
            };

            self.status_receiver.on_instance_status(
                self.status(&instance.ident, InstanceState::Activating, &instance.version)
                    .with_error(&err),
            );

            return Err(err);
        }

        let data = InstanceData {
            info: instance.clone(),
            runtime_dir: self.instance_runtime_dir(&id),
        };

        {
            let mut instances = self
                .instances
                .write()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;
            instances.insert(instance.ident.clone(), data);
        }

        info!(instance = id.as_str(), "instance started");

        let status = self.status(&instance.ident, InstanceState::Active, &instance.version);
        self.status_receiver.on_instance_status(status.clone());

        Ok(status)
    }

    async fn stop_instance(&self, ident: &InstanceIdent, remove: bool) -> Result<InstanceStatus> {
        let id = ident.to_string();

        debug!(instance = id.as_str(), remove, "stop instance");

        let (version, runtime_dir) = {
            let instances = self
                .instances
                .read()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;

            let data = instances
                .get(ident)
                .ok_or_else(|| Error::InstanceNotFound(id.clone()))?;

            (data.info.version.clone(), data.runtime_dir.clone())
        };

        self.monitoring
            .stop_instance_monitoring(&id)
            .map_err(|err| Error::StopFailed {
                id: id.clone(),
                reason: format!("monitoring unregister: {}", err),
            })?;

        self.fs
            .umount_service_rootfs(&runtime_dir.join(ROOTFS_SUBDIR))
            .map_err(|err| Error::StopFailed {
                id: id.clone(),
                reason: format!("rootfs unmount: {}", err),
            })?;

        self.fs
            .remove_all(&runtime_dir)
            .map_err(|err| Error::StopFailed {
                id: id.clone(),
                reason: format!("runtime dir removal: {}", err),
            })?;

        // Storage and state persist across restarts; purge only on
        // permanent removal.
        if remove {
            self.fs
                .remove_all(&self.storage_path(&id))
                .map_err(|err| Error::StopFailed {
                    id: id.clone(),
                    reason: format!("storage removal: {}", err),
                })?;

            self.fs
                .remove_all(&self.state_path(&id))
                .map_err(|err| Error::StopFailed {
                    id: id.clone(),
                    reason: format!("state removal: {}", err),
                })?;
        }

        {
            let mut instances = self
                .instances
                .write()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;
            instances.remove(ident);
        }

        info!(instance = id.as_str(), "instance stopped");

        let status = self.status(ident, InstanceState::Inactive, &version);
        self.status_receiver.on_instance_status(status.clone());

        Ok(status)
    }

    async fn instance_monitoring_data(
        &self,
        ident: &InstanceIdent,
    ) -> Result<InstanceMonitoringData> {
        let id = ident.to_string();

        {
            let instances = self
                .instances
                .read()
                .map_err(|err| Error::Failed(format!("lock poisoned: {}", err)))?;

            if !instances.contains_key(ident) {
                return Err(Error::InstanceNotFound(id));
            }
        }

        self.monitoring.instance_monitoring_data(&id)
    }
}
