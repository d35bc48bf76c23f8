//! Per-network device provisioning.
//!
//! [`DeviceManager`] owns the agent-side port record and the virtual
//! interface the DHCP server binds to. The control plane owns the port;
//! the manager resolves which port to use, plugs the interface, assigns
//! addresses and keeps the namespace default route current.

use crate::config::AgentConfig;
use crate::dhcp::driver::{HostNetOps, InterfaceDriver};
use crate::dhcp::plugin::{DhcpPlugin, FixedIpRequest, PortCreate, PortUpdate};
use crate::dhcp::METADATA_DEFAULT_CIDR;
use crate::error::{Result, SubnetdError};
use crate::types::{
    IpVersion, Network, Port, Subnet, DEVICE_ID_RESERVED_DHCP_PORT, ROUTER_INTERFACE_OWNERS,
};
use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Decide, per subnet, whether it is isolated.
///
/// A subnet is isolated unless a router interface port on the network holds
/// the subnet's gateway address. Subnets without a gateway are isolated.
pub fn isolated_subnets(network: &Network) -> HashMap<String, bool> {
    let mut isolated: HashMap<String, bool> =
        network.subnets.iter().map(|s| (s.id.clone(), true)).collect();

    let gateways: HashMap<&str, IpAddr> = network
        .subnets
        .iter()
        .filter_map(|s| s.gateway_ip.map(|gw| (s.id.as_str(), gw)))
        .collect();

    for port in &network.ports {
        if !ROUTER_INTERFACE_OWNERS.contains(&port.device_owner.as_str()) {
            continue;
        }
        for alloc in &port.fixed_ips {
            if gateways.get(alloc.subnet_id.as_str()) == Some(&alloc.ip_address) {
                isolated.insert(alloc.subnet_id.clone(), false);
            }
        }
    }
    isolated
}

/// Whether the metadata proxy should run for this network.
///
/// Metadata networks (a subnet inside the 169.254.169.254/16 block) qualify
/// outright when that support is enabled. Otherwise metadata is served only
/// to namespaced networks with isolated-metadata enabled and at least one
/// isolated subnet, whether or not that subnet serves DHCP.
pub fn should_enable_metadata(conf: &AgentConfig, network: &Network) -> bool {
    if conf.enable_metadata_network && conf.enable_isolated_metadata {
        let meta_cidr: IpNet = match METADATA_DEFAULT_CIDR.parse() {
            Ok(cidr) => cidr,
            Err(_) => return false,
        };
        if network.subnets.iter().any(|s| meta_cidr.contains(&s.cidr)) {
            return true;
        }
    }

    if !conf.use_namespaces || !conf.enable_isolated_metadata {
        return false;
    }

    let isolated = isolated_subnets(network);
    network
        .subnets
        .iter()
        .any(|s| isolated.get(s.id.as_str()).copied().unwrap_or(true))
}

/// Provisions the network device backing the DHCP server.
pub struct DeviceManager {
    conf: Arc<AgentConfig>,
    driver: Arc<dyn InterfaceDriver>,
    host_net: Arc<dyn HostNetOps>,
    plugin: Arc<dyn DhcpPlugin>,
}

impl DeviceManager {
    pub fn new(
        conf: Arc<AgentConfig>,
        driver: Arc<dyn InterfaceDriver>,
        host_net: Arc<dyn HostNetOps>,
        plugin: Arc<dyn DhcpPlugin>,
    ) -> Self {
        Self { conf, driver, host_net, plugin }
    }

    /// Stable device id binding (host, network) to the DHCP port.
    ///
    /// The host name is folded through a UUID so the id stays within the
    /// control plane's length limits regardless of hostname length.
    pub fn device_id(&self, network: &Network) -> String {
        let host_uuid = Uuid::new_v5(&Uuid::NAMESPACE_DNS, self.conf.host.as_bytes());
        format!("dhcp{}-{}", host_uuid, network.id)
    }

    /// Resolve the DHCP port for the network, in priority order: reuse a
    /// port this agent already owns, claim a reserved port, create a new one.
    pub async fn setup_dhcp_port(&self, network: &Network) -> Result<Port> {
        let device_id = self.device_id(network);
        let enabled_subnet_ids: Vec<&str> = network
            .subnets
            .iter()
            .filter(|s| s.enable_dhcp)
            .map(|s| s.id.as_str())
            .collect();

        let mut dhcp_port: Option<Port> = None;

        for port in &network.ports {
            if port.device_id.as_deref() == Some(device_id.as_str()) {
                // Reuse. Extend the fixed-ip set if subnets gained DHCP
                // since the port was bound.
                let port_subnet_ids: Vec<&str> =
                    port.fixed_ips.iter().map(|ip| ip.subnet_id.as_str()).collect();
                let missing: Vec<&str> = enabled_subnet_ids
                    .iter()
                    .filter(|id| !port_subnet_ids.contains(*id))
                    .copied()
                    .collect();
                if missing.is_empty() {
                    dhcp_port = Some(port.clone());
                } else {
                    let mut fixed_ips: Vec<FixedIpRequest> = port
                        .fixed_ips
                        .iter()
                        .map(|ip| FixedIpRequest {
                            subnet_id: ip.subnet_id.clone(),
                            ip_address: Some(ip.ip_address),
                        })
                        .collect();
                    fixed_ips.extend(missing.iter().map(|id| FixedIpRequest {
                        subnet_id: id.to_string(),
                        ip_address: None,
                    }));
                    let updated = self
                        .plugin
                        .update_dhcp_port(
                            &port.id,
                            PortUpdate {
                                network_id: network.id.clone(),
                                fixed_ips: Some(fixed_ips),
                                ..Default::default()
                            },
                        )
                        .await?;
                    dhcp_port = Some(updated.ok_or_else(|| SubnetdError::Conflict {
                        network_id: network.id.clone(),
                    })?);
                }
                break;
            }
        }

        if dhcp_port.is_none() {
            // Look for a port reserved for any agent to claim.
            for port in &network.ports {
                if port.device_id.as_deref() == Some(DEVICE_ID_RESERVED_DHCP_PORT) {
                    debug!(port_id = %port.id, "Claiming reserved DHCP port");
                    let updated = self
                        .plugin
                        .update_dhcp_port(
                            &port.id,
                            PortUpdate {
                                network_id: network.id.clone(),
                                device_id: Some(device_id.clone()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    if let Some(port) = updated {
                        dhcp_port = Some(port);
                        break;
                    }
                }
            }
        }

        if dhcp_port.is_none() {
            debug!(network_id = %network.id, "Creating new DHCP port");
            let created = self
                .plugin
                .create_dhcp_port(PortCreate {
                    name: String::new(),
                    admin_state_up: true,
                    device_id,
                    network_id: network.id.clone(),
                    tenant_id: network.tenant_id.clone(),
                    fixed_ips: enabled_subnet_ids
                        .iter()
                        .map(|id| FixedIpRequest { subnet_id: id.to_string(), ip_address: None })
                        .collect(),
                })
                .await?;
            dhcp_port = created;
        }

        dhcp_port.ok_or_else(|| SubnetdError::Conflict { network_id: network.id.clone() })
    }

    /// Provision the interface for the network and return its name.
    pub async fn setup(&self, network: &Network) -> Result<String> {
        let port = self.setup_dhcp_port(network).await?;
        let interface_name = self.driver.device_name(&port);
        let namespace = network.namespace();

        if self.host_net.device_is_ready(&interface_name, namespace.as_deref()).await {
            debug!(device = %interface_name, "Reusing existing device");
        } else {
            self.driver
                .plug(
                    &network.id,
                    &port.id,
                    &interface_name,
                    &port.mac_address,
                    namespace.as_deref(),
                )
                .await?;
        }

        let subnets: HashMap<&str, &Subnet> =
            network.subnets.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut ip_cidrs: Vec<String> = Vec::new();
        for alloc in &port.fixed_ips {
            if let Some(subnet) = subnets.get(alloc.subnet_id.as_str()) {
                ip_cidrs.push(format!("{}/{}", alloc.ip_address, subnet.cidr.prefix_len()));
            }
        }

        if self.conf.enable_isolated_metadata {
            ip_cidrs.push(METADATA_DEFAULT_CIDR.to_string());
        }

        self.driver.init_l3(&interface_name, &ip_cidrs, namespace.as_deref()).await?;

        // Outside a namespace the device competes with other host routes.
        if namespace.is_none() {
            self.host_net.pullup_route(&interface_name).await?;
        }

        if self.conf.use_namespaces {
            self.set_default_route(network, &interface_name).await?;
        }

        Ok(interface_name)
    }

    /// Refresh namespace state after an allocation change.
    pub async fn update(&self, network: &Network, device_name: &str) -> Result<()> {
        if self.conf.use_namespaces {
            self.set_default_route(network, device_name).await?;
        }
        Ok(())
    }

    /// Tear down the interface and release the port record.
    pub async fn destroy(&self, network: &Network, device_name: &str) -> Result<()> {
        self.driver.unplug(device_name, network.namespace().as_deref()).await?;
        self.plugin.release_dhcp_port(&network.id, &self.device_id(network)).await
    }

    /// Converge the namespace default route onto the first IPv4 subnet
    /// gateway, touching the routing table only when something changed.
    pub async fn set_default_route(&self, network: &Network, device_name: &str) -> Result<()> {
        let namespace = network.namespace();
        let current = self.host_net.get_gateway(device_name, namespace.as_deref()).await?;

        for subnet in &network.subnets {
            if !subnet.enable_dhcp || subnet.ip_version != IpVersion::V4 {
                continue;
            }
            let Some(gateway) = subnet.gateway_ip else { continue };
            if current != Some(gateway) {
                self.host_net.add_gateway(device_name, namespace.as_deref(), gateway).await?;
            }
            return Ok(());
        }

        // No eligible gateway remains; drop a stale route if present.
        if let Some(stale) = current {
            self.host_net.delete_gateway(device_name, namespace.as_deref(), stale).await?;
        }
        Ok(())
    }

    /// Map subnet ids to the agent interface's own address on each subnet.
    pub async fn subnet_interface_ip_map(
        &self,
        network: &Network,
        device_name: &str,
    ) -> Result<HashMap<String, IpAddr>> {
        let addresses = self
            .host_net
            .list_addresses(device_name, network.namespace().as_deref())
            .await?;

        let mut map = HashMap::new();
        for cidr in &addresses {
            let Ok(net) = cidr.parse::<IpNet>() else {
                warn!(cidr = %cidr, "Skipping unparseable interface address");
                continue;
            };
            for subnet in &network.subnets {
                if net.trunc() == subnet.cidr.trunc() {
                    map.insert(subnet.id.clone(), net.addr());
                }
            }
        }
        Ok(map)
    }
}
