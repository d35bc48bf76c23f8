//! Host networking seams.
//!
//! [`InterfaceDriver`] creates and addresses the virtual interface;
//! [`HostNetOps`] covers route, namespace and lease-release plumbing. Both
//! are synchronous from the caller's point of view (each call blocks until
//! the host operation completes) and carry no timeouts of their own.

use crate::error::Result;
use crate::types::Port;
use async_trait::async_trait;
use std::net::IpAddr;

/// Plugs and unplugs the per-network virtual interface.
#[async_trait]
pub trait InterfaceDriver: Send + Sync {
    /// Interface name the driver will use for this port.
    fn device_name(&self, port: &Port) -> String;

    /// Create the interface and attach it to the network, optionally inside
    /// a namespace.
    async fn plug(
        &self,
        network_id: &str,
        port_id: &str,
        device_name: &str,
        mac_address: &str,
        namespace: Option<&str>,
    ) -> Result<()>;

    /// Remove the interface.
    async fn unplug(&self, device_name: &str, namespace: Option<&str>) -> Result<()>;

    /// Assign the given CIDRs to the interface and bring it up.
    async fn init_l3(
        &self,
        device_name: &str,
        ip_cidrs: &[String],
        namespace: Option<&str>,
    ) -> Result<()>;
}

/// Route, namespace and address plumbing on the host.
#[async_trait]
pub trait HostNetOps: Send + Sync {
    /// Whether the device exists and is up.
    async fn device_is_ready(&self, device_name: &str, namespace: Option<&str>) -> bool;

    /// CIDRs currently assigned to the device.
    async fn list_addresses(
        &self,
        device_name: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<String>>;

    /// Current default gateway on the device, if any.
    async fn get_gateway(
        &self,
        device_name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<IpAddr>>;

    async fn add_gateway(
        &self,
        device_name: &str,
        namespace: Option<&str>,
        gateway: IpAddr,
    ) -> Result<()>;

    async fn delete_gateway(
        &self,
        device_name: &str,
        namespace: Option<&str>,
        gateway: IpAddr,
    ) -> Result<()>;

    /// Ensure the device is first in device-route priority.
    async fn pullup_route(&self, device_name: &str) -> Result<()>;

    /// Delete a network namespace.
    async fn delete_namespace(&self, namespace: &str) -> Result<()>;

    /// Tell the running DHCP server to forget a lease, synchronously.
    async fn release_lease(
        &self,
        namespace: Option<&str>,
        interface: &str,
        ip: &str,
        mac: &str,
    ) -> Result<()>;
}
