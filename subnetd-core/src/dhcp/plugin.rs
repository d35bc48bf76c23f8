//! Control-plane client seam for DHCP port records.

use crate::error::Result;
use crate::types::Port;
use async_trait::async_trait;
use std::net::IpAddr;

/// A fixed-ip binding requested on a port. The address is left to the
/// control plane when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedIpRequest {
    pub subnet_id: String,
    pub ip_address: Option<IpAddr>,
}

/// Fields updated on an existing DHCP port.
#[derive(Debug, Clone, Default)]
pub struct PortUpdate {
    pub network_id: String,
    pub fixed_ips: Option<Vec<FixedIpRequest>>,
    pub device_id: Option<String>,
}

/// A new DHCP port to create.
#[derive(Debug, Clone)]
pub struct PortCreate {
    pub name: String,
    pub admin_state_up: bool,
    pub device_id: String,
    pub network_id: String,
    pub tenant_id: String,
    pub fixed_ips: Vec<FixedIpRequest>,
}

/// The control plane that owns port records. Supplies and persists the
/// DHCP-owning port; never implemented in this crate.
#[async_trait]
pub trait DhcpPlugin: Send + Sync {
    /// Update a port; a None result means the port could not be claimed.
    async fn update_dhcp_port(&self, port_id: &str, update: PortUpdate) -> Result<Option<Port>>;

    /// Create a new DHCP port; a None result means creation was refused.
    async fn create_dhcp_port(&self, create: PortCreate) -> Result<Option<Port>>;

    /// Release the DHCP port identified by its device id back to the pool.
    async fn release_dhcp_port(&self, network_id: &str, device_id: &str) -> Result<()>;
}
