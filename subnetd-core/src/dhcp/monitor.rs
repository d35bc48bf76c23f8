//! External process supervision seam.
//!
//! The agent never spawns dnsmasq itself; it hands a command builder to a
//! [`ProcessMonitor`] that tracks one OS process per (network id, service
//! name) and is reused sequentially across enable/disable/reload calls.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A fully resolved command for spawning an external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Identity of a monitored per-network service.
#[derive(Debug, Clone)]
pub struct MonitoredService {
    /// Network id the process belongs to.
    pub network_id: String,
    /// Service name, e.g. "dnsmasq".
    pub service: String,
    /// Path of the PID artifact the process writes.
    pub pid_file: PathBuf,
    /// Namespace the process runs in, if any.
    pub namespace: Option<String>,
}

/// Builds the spawn command given the PID file path. The monitor calls this
/// again if it has to respawn the process.
pub type CommandBuilder<'a> = &'a (dyn Fn(&Path) -> CommandSpec + Send + Sync);

/// Supervises external server processes keyed by (network id, service name).
///
/// Implementations must be safe for sequential reuse across
/// enable/disable/reload calls for the same key; the caller serializes
/// operations per network id.
#[async_trait]
pub trait ProcessMonitor: Send + Sync {
    /// Spawn the service, or signal it to reload when `reload` is true and
    /// the process is already running.
    async fn enable(
        &self,
        service: &MonitoredService,
        env: HashMap<String, String>,
        reload: bool,
        cmd_builder: CommandBuilder<'_>,
    ) -> Result<()>;

    /// Stop the service and forget about it.
    async fn disable(&self, service: &MonitoredService) -> Result<()>;

    /// PID recorded for the service, if the process ever started.
    async fn get_pid(&self, service: &MonitoredService) -> Option<u32>;

    /// Liveness check keyed by the PID artifact.
    async fn is_active(&self, service: &MonitoredService) -> bool;
}
