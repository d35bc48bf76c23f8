//! Domain types for the network snapshot supplied by the control plane.

pub mod network;

pub use network::{
    ExtraDhcpOpt, FixedIp, HostRoute, IpVersion, Ipv6Mode, Network, Port, Subnet,
    DEVICE_ID_RESERVED_DHCP_PORT, DEVICE_OWNER_DHCP, NS_PREFIX, ROUTER_INTERFACE_OWNERS,
};
