//! Host-local DHCP provisioning.
//!
//! Given a [`crate::types::Network`] snapshot, this module provisions the
//! per-network interface, generates the dnsmasq configuration artifacts and
//! supervises the dnsmasq process through the injected collaborators.

pub mod confgen;
pub mod device;
pub mod driver;
pub mod hook;
pub mod lifecycle;
pub mod monitor;
pub mod plugin;

pub use confgen::ConfigWriter;
pub use device::DeviceManager;
pub use lifecycle::DnsmasqService;

/// Well-known metadata service address.
pub const METADATA_DEFAULT_IP: &str = "169.254.169.254";

/// CIDR assigned to the agent interface when isolated metadata is enabled.
pub const METADATA_DEFAULT_CIDR: &str = "169.254.169.254/16";

/// Service name under which dnsmasq processes are registered with the monitor.
pub const DNSMASQ_SERVICE_NAME: &str = "dnsmasq";

/// Legacy Windows static-route option code, mirrored from
/// `classless-static-route` for pre-Vista clients.
pub const WIN2K3_STATIC_DNS: u32 = 249;

/// Environment variable carrying the network id into spawned processes.
pub const NETWORK_ID_KEY: &str = "SUBNETD_NETWORK_ID";

/// Environment variable naming the lease-relay Unix socket.
pub const RELAY_SOCKET_PATH_KEY: &str = "SUBNETD_RELAY_SOCKET_PATH";
