//! Immutable snapshot model of a network and its subnets, ports and leases.
//!
//! The control plane hands the agent a complete snapshot per operation; the
//! agent never mutates it. Fields mirror the control plane's wire records,
//! with explicit optional fields instead of dynamic attribute access.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Prefix of per-network namespace names.
pub const NS_PREFIX: &str = "sdhcp-";

/// Device owner of the agent's own DHCP ports.
pub const DEVICE_OWNER_DHCP: &str = "network:dhcp";

/// Device owners that mark a port as a router interface.
pub const ROUTER_INTERFACE_OWNERS: &[&str] =
    &["network:router_interface", "network:router_interface_distributed"];

/// Sentinel device id of a port pre-reserved for a DHCP agent to claim.
pub const DEVICE_ID_RESERVED_DHCP_PORT: &str = "reserved_dhcp_port";

/// IP version of a subnet or address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Whether `addr` belongs to this IP version.
    pub fn matches(self, addr: &IpAddr) -> bool {
        match self {
            IpVersion::V4 => addr.is_ipv4(),
            IpVersion::V6 => addr.is_ipv6(),
        }
    }
}

impl TryFrom<u8> for IpVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            other => Err(format!("Invalid IP version: {}", other)),
        }
    }
}

impl From<IpVersion> for u8 {
    fn from(value: IpVersion) -> u8 {
        match value {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

/// IPv6 address or router-advertisement mode of a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ipv6Mode {
    Dhcpv6Stateful,
    Dhcpv6Stateless,
    Slaac,
}

/// A static route declared on a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRoute {
    pub destination: IpNet,
    pub nexthop: IpAddr,
}

/// A per-port DHCP option override. `opt_name` may carry an embedded
/// `tag:<name>,` prefix which is preserved in the generated options file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraDhcpOpt {
    pub opt_name: String,
    pub opt_value: String,
}

/// A guaranteed address assignment, scoped to one subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: IpAddr,
}

/// An IP range with DHCP/RA configuration attached to a network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub ip_version: IpVersion,
    pub cidr: IpNet,
    pub enable_dhcp: bool,
    pub gateway_ip: Option<IpAddr>,
    #[serde(default)]
    pub dns_nameservers: Vec<IpAddr>,
    #[serde(default)]
    pub host_routes: Vec<HostRoute>,
    pub ipv6_address_mode: Option<Ipv6Mode>,
    pub ipv6_ra_mode: Option<Ipv6Mode>,
}

/// A port attached to the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub mac_address: String,
    pub device_owner: String,
    pub device_id: Option<String>,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default)]
    pub extra_dhcp_opts: Vec<ExtraDhcpOpt>,
    pub tenant_id: String,
}

/// The immutable network snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub ports: Vec<Port>,
    /// Whether the per-network interface and server live in a namespace.
    #[serde(default = "default_true")]
    pub use_namespaces: bool,
}

fn default_true() -> bool {
    true
}

impl Network {
    /// Namespace hosting this network's interface and server process,
    /// or None when namespacing is disabled.
    pub fn namespace(&self) -> Option<String> {
        self.use_namespaces.then(|| format!("{}{}", NS_PREFIX, self.id))
    }

    /// Whether any subnet on the network still has DHCP enabled.
    pub fn dhcp_enabled(&self) -> bool {
        self.subnets.iter().any(|s| s.enable_dhcp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_version_serde() {
        let v: IpVersion = serde_json::from_str("4").unwrap();
        assert_eq!(v, IpVersion::V4);
        assert_eq!(serde_json::to_string(&IpVersion::V6).unwrap(), "6");
        assert!(serde_json::from_str::<IpVersion>("5").is_err());
    }

    #[test]
    fn test_ipv6_mode_serde() {
        let m: Ipv6Mode = serde_json::from_str("\"dhcpv6-stateful\"").unwrap();
        assert_eq!(m, Ipv6Mode::Dhcpv6Stateful);
        let m: Ipv6Mode = serde_json::from_str("\"slaac\"").unwrap();
        assert_eq!(m, Ipv6Mode::Slaac);
    }

    #[test]
    fn test_namespace_name() {
        let net = Network {
            id: "aaaa".to_string(),
            tenant_id: "t".to_string(),
            subnets: vec![],
            ports: vec![],
            use_namespaces: true,
        };
        assert_eq!(net.namespace().as_deref(), Some("sdhcp-aaaa"));

        let flat = Network { use_namespaces: false, ..net };
        assert_eq!(flat.namespace(), None);
    }
}
