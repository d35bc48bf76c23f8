//! Core library for subnetd, a host-local DHCP provisioning agent.
//!
//! Given immutable network snapshots from a control plane, subnetd
//! provisions a per-network interface, generates dnsmasq configuration
//! artifacts and supervises the dnsmasq process. Host-touching operations
//! go through injected collaborator traits so the orchestration logic
//! stays testable without root privileges.

pub mod config;
pub mod dhcp;
pub mod error;
pub mod observability;
pub mod paths;
pub mod types;

pub use config::AgentConfig;
pub use error::{Result, SubnetdError};
pub use observability::init as init_observability;
