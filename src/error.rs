//! Error types for the runtime launcher.

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for launcher operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification reported to the orchestrator.
///
/// Every [`Error`] variant maps onto exactly one kind via [`Error::kind`].
/// The orchestrator keys retry/abort policy off the kind, not the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input (unparseable device path, empty CPU list, bad config).
    InvalidArgument,
    /// Unknown instance, unit, or resource.
    NotFound,
    /// Generic operation failure (unhealthy unit, failed lifecycle step).
    Failed,
    /// Value outside an allowed bound.
    OutOfRange,
    /// A bounded call exceeded its deadline.
    Timeout,
    /// An external process or command exited non-zero.
    Runtime,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotFound => write!(f, "not found"),
            Self::Failed => write!(f, "failed"),
            Self::OutOfRange => write!(f, "out of range"),
            Self::Timeout => write!(f, "timeout"),
            Self::Runtime => write!(f, "runtime"),
        }
    }
}

/// Errors that can occur in the runtime launcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Input Validation Errors
    // =========================================================================
    /// Malformed input value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Value outside an allowed bound.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    // =========================================================================
    // Instance Lifecycle Errors
    // =========================================================================
    /// Instance not found.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Instance already exists.
    #[error("instance already exists: {0}")]
    InstanceAlreadyExists(String),

    /// Instance start failed at a specific step.
    #[error("failed to start instance '{id}' at step '{step}': {reason}")]
    StartFailed {
        id: String,
        step: String,
        reason: String,
    },

    /// Instance stop failed.
    #[error("failed to stop instance '{id}': {reason}")]
    StopFailed { id: String, reason: String },

    /// Runtime capacity exhausted.
    #[error("runtime '{runtime}' is at capacity ({max} instances)")]
    CapacityExhausted { runtime: String, max: usize },

    /// Operation not supported by this runtime.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Runtime plugin name not registered.
    #[error("unknown runtime plugin: {0}")]
    UnknownPlugin(String),

    /// Runtime config parsing failed.
    #[error("invalid runtime config for '{runtime}': {reason}")]
    InvalidConfig { runtime: String, reason: String },

    // =========================================================================
    // Partition / Update Errors
    // =========================================================================
    /// Device path does not look like a partition.
    #[error("device path is not a partition: {0}")]
    NotAPartition(String),

    /// OS image write to a slot device failed.
    #[error("failed to write image '{image}' to '{device}': {reason}")]
    ImageWriteFailed {
        image: PathBuf,
        device: PathBuf,
        reason: String,
    },

    /// Post-update verification reported an unhealthy unit.
    #[error("update verification failed: unit '{unit}' is {state}")]
    UpdateVerificationFailed { unit: String, state: String },

    /// Update sequence failed in a specific state.
    #[error("update failed in state '{state}': {reason}")]
    UpdateFailed { state: String, reason: String },

    // =========================================================================
    // systemd Errors
    // =========================================================================
    /// systemd unit not found.
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    /// systemd call failed.
    #[error("systemd call '{call}' failed: {reason}")]
    SystemdCallFailed { call: String, reason: String },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Filesystem collaborator operation failed.
    #[error("filesystem operation '{op}' failed on {path}: {reason}")]
    FsOperationFailed {
        op: String,
        path: PathBuf,
        reason: String,
    },

    /// Monitoring collaborator operation failed.
    #[error("monitoring operation failed for instance '{id}': {reason}")]
    MonitoringFailed { id: String, reason: String },

    /// Generic operation failure.
    #[error("operation failed: {0}")]
    Failed(String),

    // =========================================================================
    // Process / I/O Errors
    // =========================================================================
    /// External command exited non-zero.
    #[error("command '{command}' exited with code {code}")]
    CommandFailed { command: String, code: i32 },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns the coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_)
            | Self::NotAPartition(_)
            | Self::InvalidConfig { .. }
            | Self::UnknownPlugin(_) => ErrorKind::InvalidArgument,
            Self::InstanceNotFound(_) | Self::UnitNotFound(_) => ErrorKind::NotFound,
            Self::OutOfRange(_) | Self::CapacityExhausted { .. } => ErrorKind::OutOfRange,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CommandFailed { .. } => ErrorKind::Runtime,
            Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Failed,
        }
    }
}
