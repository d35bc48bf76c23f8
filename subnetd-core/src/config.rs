//! Agent configuration.

use crate::error::{Result, SubnetdError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Persistent configuration for the DHCP provisioning agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Root directory holding one config directory per network id.
    pub dhcp_confs: PathBuf,
    /// Domain appended to generated hostnames, if any.
    pub dhcp_domain: Option<String>,
    /// Lease duration in seconds. -1 means infinite leases.
    pub dhcp_lease_duration: i64,
    /// Ceiling for the computed `--dhcp-lease-max` value.
    pub dnsmasq_lease_max: u64,
    /// Value passed verbatim to dnsmasq's `--conf-file`.
    pub dnsmasq_config_file: String,
    /// Upstream DNS servers forwarded to dnsmasq as `--server` flags.
    pub dnsmasq_dns_servers: Vec<IpAddr>,
    /// Ask dnsmasq to always broadcast replies.
    pub dhcp_broadcast_reply: bool,
    /// Serve metadata routes to isolated subnets.
    pub enable_isolated_metadata: bool,
    /// Treat networks with a subnet in the metadata block as metadata networks.
    pub enable_metadata_network: bool,
    /// Host each per-network interface inside its own network namespace.
    pub use_namespaces: bool,
    /// Delete the network namespace when DHCP is disabled for a network.
    pub dhcp_delete_namespaces: bool,
    /// Identity of this host, used to derive the DHCP port device id.
    pub host: String,
    /// Name of the interface driver implementation. Must be non-empty.
    pub interface_driver: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            dhcp_confs: paths::confs_dir(),
            dhcp_domain: None,
            dhcp_lease_duration: 86400,
            dnsmasq_lease_max: 16_777_216,
            dnsmasq_config_file: String::new(),
            dnsmasq_dns_servers: Vec::new(),
            dhcp_broadcast_reply: false,
            enable_isolated_metadata: false,
            enable_metadata_network: false,
            use_namespaces: true,
            dhcp_delete_namespaces: false,
            host: hostname(),
            interface_driver: String::new(),
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

impl AgentConfig {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::data_dir().join("config.json")
    }

    /// Load configuration from disk, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(&path).map_err(|e| SubnetdError::InvalidConfig {
                reason: format!("Failed to read config: {}", e),
            })?;
        serde_json::from_str(&content).map_err(|e| SubnetdError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SubnetdError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| SubnetdError::InvalidConfig {
                reason: format!("Failed to serialize config: {}", e),
            })?;
        std::fs::write(&path, content).map_err(|e| SubnetdError::IoError { path, source: e })
    }

    /// Startup validation. An agent cannot provision devices without a driver.
    pub fn validate(&self) -> Result<()> {
        if self.interface_driver.is_empty() {
            return Err(SubnetdError::DriverInit {
                reason: "an interface driver must be specified".to_string(),
            });
        }
        Ok(())
    }
}
