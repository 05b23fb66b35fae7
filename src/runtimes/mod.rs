//! Runtime backend implementations and plugin dispatch.
//!
//! Each backend implements the common [`Runtime`] lifecycle contract for
//! one execution technology. The registry maps the plugin tag of each
//! configured runtime onto its backend once at configuration-load time;
//! nothing is re-dispatched per call.

pub mod boot;
pub mod container;
pub mod rootfs;

pub use self::boot::{BootController, BootRuntime, UpdateState};
pub use self::container::ContainerRuntime;
pub use self::rootfs::RootfsRuntime;

use std::sync::Arc;

use tracing::debug;

use crate::config::RuntimeConfig;
use crate::constants::{RUNTIME_BOOT, RUNTIME_CONTAINER, RUNTIME_ROOTFS};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::monitoring::Monitoring;
use crate::nodeinfo::NodeInfoProvider;
use crate::runtime::{InstanceStatusReceiver, Runtime};
use crate::systemd::SystemdConn;

/// External collaborators shared across runtime backends.
///
/// All handles are long-lived and safe for concurrent use; backends keep
/// references only to the collaborators they need.
pub struct Collaborators {
    /// Node hardware/software inventory.
    pub node_info: Arc<dyn NodeInfoProvider>,
    /// Host filesystem operations.
    pub fs: Arc<dyn FileSystem>,
    /// Instance monitoring sink.
    pub monitoring: Arc<dyn Monitoring>,
    /// Instance status receiver.
    pub status_receiver: Arc<dyn InstanceStatusReceiver>,
    /// Shared systemd connection.
    pub systemd: Arc<dyn SystemdConn>,
    /// Bootloader slot controller.
    pub boot_controller: Arc<dyn boot::BootController>,
}

/// Registry of configured runtimes.
pub struct RuntimeRegistry {
    runtimes: Vec<Arc<dyn Runtime>>,
}

impl std::fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("runtimes", &self.runtimes.len())
            .finish()
    }
}

impl RuntimeRegistry {
    /// Builds runtimes from their config envelopes.
    ///
    /// Each envelope's plugin tag selects the backend; an unknown tag
    /// fails construction of the whole registry.
    pub fn new(configs: &[RuntimeConfig], collaborators: &Collaborators) -> Result<Self> {
        debug!(num_runtimes = configs.len(), "init runtimes");

        let mut runtimes: Vec<Arc<dyn Runtime>> = Vec::with_capacity(configs.len());

        for config in configs {
            debug!(
                plugin = config.plugin.as_str(),
                runtime_type = config.runtime_type.as_str(),
                "init runtime"
            );

            config.validate()?;

            let runtime: Arc<dyn Runtime> = match config.plugin.as_str() {
                RUNTIME_CONTAINER => Arc::new(ContainerRuntime::new(
                    config,
                    collaborators.node_info.as_ref(),
                    collaborators.fs.clone(),
                    collaborators.monitoring.clone(),
                    collaborators.status_receiver.clone(),
                )?),
                RUNTIME_ROOTFS => Arc::new(RootfsRuntime::new(
                    config,
                    collaborators.node_info.as_ref(),
                    collaborators.status_receiver.clone(),
                    collaborators.systemd.clone(),
                )?),
                RUNTIME_BOOT => Arc::new(BootRuntime::new(
                    config,
                    collaborators.node_info.as_ref(),
                    collaborators.boot_controller.clone(),
                    collaborators.status_receiver.clone(),
                    collaborators.systemd.clone(),
                )?),
                other => return Err(Error::UnknownPlugin(other.to_string())),
            };

            runtimes.push(runtime);
        }

        Ok(Self { runtimes })
    }

    /// Returns all configured runtimes.
    pub fn all(&self) -> &[Arc<dyn Runtime>] {
        &self.runtimes
    }

    /// Gets a runtime by its type tag.
    pub fn get(&self, runtime_type: &str) -> Option<&Arc<dyn Runtime>> {
        self.runtimes
            .iter()
            .find(|runtime| runtime.runtime_type() == runtime_type)
    }
}
