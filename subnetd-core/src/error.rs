//! Error types for subnetd.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for subnetd operations.
pub type Result<T> = std::result::Result<T, SubnetdError>;

/// Main error type for subnetd.
#[derive(Error, Debug)]
pub enum SubnetdError {
    /// No DHCP port could be resolved or created for the network.
    #[error("Conflict: unable to resolve a DHCP port for network {network_id}")]
    Conflict { network_id: String },

    /// The interface driver is missing or misconfigured. Fatal at startup.
    #[error("Interface driver initialization failed: {reason}")]
    DriverInit { reason: String },

    /// Namespace deletion failed during disable. Logged by callers, never fatal.
    #[error("Failed to delete namespace {namespace}: {reason}")]
    NamespaceTeardown { namespace: String, reason: String },

    /// The external process monitor reported a supervision failure.
    /// Constructed by [`ProcessMonitor`](crate::dhcp::monitor::ProcessMonitor)
    /// implementations, not by the orchestration itself.
    #[error("Process supervision failed for {service} on network {network_id}: {reason}")]
    ProcessSupervision { network_id: String, service: String, reason: String },

    /// Interface plugging or addressing failed. Constructed by
    /// [`InterfaceDriver`](crate::dhcp::driver::InterfaceDriver) and
    /// [`HostNetOps`](crate::dhcp::driver::HostNetOps) implementations.
    #[error("Device setup failed: {reason}")]
    NetworkSetupFailed { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SubnetdError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }
}
