//! dnsmasq service lifecycle.
//!
//! [`DnsmasqService`] ties together device provisioning, config generation
//! and process supervision for one network at a time. Operations for the
//! same network are expected to be serialized by the caller; state between
//! restarts lives in the per-network config directory.

use crate::config::AgentConfig;
use crate::dhcp::confgen::{replace_file, ConfigWriter};
use crate::dhcp::device::DeviceManager;
use crate::dhcp::driver::HostNetOps;
use crate::dhcp::monitor::{MonitoredService, ProcessMonitor};
use crate::dhcp::{DNSMASQ_SERVICE_NAME, NETWORK_ID_KEY};
use crate::error::{Result, SubnetdError};
use crate::types::Network;
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Network ids that already have a config directory on this host.
///
/// Used on startup to find networks left over from a previous run. Only
/// directory names that parse as UUIDs count; anything else in the tree is
/// agent bookkeeping.
pub fn existing_dhcp_networks(conf: &AgentConfig) -> Vec<String> {
    let entries = match std::fs::read_dir(&conf.dhcp_confs) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| Uuid::parse_str(name).is_ok())
        .collect()
}

/// Drives one dnsmasq instance per network.
pub struct DnsmasqService {
    conf: Arc<AgentConfig>,
    monitor: Arc<dyn ProcessMonitor>,
    host_net: Arc<dyn HostNetOps>,
    devices: DeviceManager,
}

impl DnsmasqService {
    pub fn new(
        conf: Arc<AgentConfig>,
        monitor: Arc<dyn ProcessMonitor>,
        host_net: Arc<dyn HostNetOps>,
        devices: DeviceManager,
    ) -> Self {
        Self { conf, monitor, host_net, devices }
    }

    fn writer(&self, network_id: &str) -> ConfigWriter {
        ConfigWriter::new((*self.conf).clone(), network_id)
    }

    fn network_conf_dir(&self, network_id: &str) -> PathBuf {
        self.conf.dhcp_confs.join(network_id)
    }

    fn monitored(&self, network: &Network) -> MonitoredService {
        MonitoredService {
            network_id: network.id.clone(),
            service: DNSMASQ_SERVICE_NAME.to_string(),
            pid_file: self.writer(&network.id).conf_file_name("pid"),
            namespace: network.namespace(),
        }
    }

    /// Read a single-value artifact from the network's config directory.
    fn get_value_from_conf_file(&self, network_id: &str, kind: &str) -> Option<String> {
        let path = self.writer(network_id).conf_file_name(kind);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                debug!(path = ?path, error = %e, "Unable to read config artifact");
                None
            }
        }
    }

    /// Interface name recorded when the server was last spawned.
    pub fn interface_name(&self, network_id: &str) -> Option<String> {
        self.get_value_from_conf_file(network_id, "interface")
    }

    fn set_interface_name(&self, network_id: &str, interface: &str) -> Result<()> {
        replace_file(&self.writer(network_id).conf_file_name("interface"), interface)
    }

    /// PID recorded for the network's server, if any.
    pub fn pid(&self, network_id: &str) -> Option<u32> {
        self.get_value_from_conf_file(network_id, "pid")?.parse().ok()
    }

    /// Whether a server is currently running for this network.
    pub async fn active(&self, network: &Network) -> bool {
        self.monitor.is_active(&self.monitored(network)).await
    }

    /// Bring DHCP service up for the network.
    ///
    /// A network with no DHCP-enabled subnet is a no-op. An already active
    /// network is torn down first (keeping its port) and rebuilt, so enable
    /// doubles as a restart with fresh allocations.
    #[instrument(skip(self, network), fields(network_id = %network.id))]
    pub async fn enable(&self, network: &Network) -> Result<()> {
        if self.active(network).await {
            self.disable(network, true).await?;
        }
        if !network.dhcp_enabled() {
            debug!("No DHCP-enabled subnets; not starting dnsmasq");
            return Ok(());
        }

        let conf_dir = self.network_conf_dir(&network.id);
        std::fs::create_dir_all(&conf_dir)
            .map_err(|e| SubnetdError::IoError { path: conf_dir.clone(), source: e })?;

        let interface = self.devices.setup(network).await?;
        self.set_interface_name(&network.id, &interface)?;
        self.spawn_or_reload(network, &interface, false).await?;

        counter!("subnetd_dhcp_enable_total").increment(1);
        info!(interface = %interface, "DHCP service enabled");
        Ok(())
    }

    /// Full stop-then-start cycle.
    pub async fn restart(&self, network: &Network) -> Result<()> {
        self.disable(network, true).await?;
        self.enable(network).await
    }

    /// Stop the server and clean up. `retain_port` keeps the device and
    /// port record for a subsequent enable.
    #[instrument(skip(self, network), fields(network_id = %network.id, retain_port))]
    pub async fn disable(&self, network: &Network, retain_port: bool) -> Result<()> {
        let service = self.monitored(network);
        let pid = self.monitor.get_pid(&service).await;
        self.monitor.disable(&service).await?;

        if pid.is_some() && !retain_port {
            if let Some(interface) = self.interface_name(&network.id) {
                self.devices.destroy(network, &interface).await?;
            }
        }

        // Artifacts always go; a retained port only keeps the device and
        // port record, never stale pid/interface state.
        let conf_dir = self.network_conf_dir(&network.id);
        if let Err(e) = std::fs::remove_dir_all(&conf_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = ?conf_dir, error = %e, "Failed to remove config directory");
            }
        }

        if !retain_port {
            // Namespace teardown is best-effort; another process may still
            // hold a device inside it.
            if self.conf.dhcp_delete_namespaces {
                if let Some(namespace) = network.namespace() {
                    if let Err(e) = self.host_net.delete_namespace(&namespace).await {
                        error!(namespace = %namespace, error = %e, "Failed to delete namespace");
                    }
                }
            }
        }

        counter!("subnetd_dhcp_disable_total").increment(1);
        Ok(())
    }

    /// Apply an updated snapshot to a running server.
    ///
    /// Rewrites the artifacts, releases leases no longer backed by an
    /// allocation and signals the running process to re-read its files.
    #[instrument(skip(self, network), fields(network_id = %network.id))]
    pub async fn reload_allocations(&self, network: &Network) -> Result<()> {
        // The last DHCP-enabled subnet may have been removed.
        if !network.dhcp_enabled() {
            self.disable(network, false).await?;
            debug!("Killing dnsmasq as no DHCP-enabled subnets remain");
            return Ok(());
        }

        self.release_unused_leases(network).await?;

        let interface = self.interface_name(&network.id).ok_or_else(|| {
            SubnetdError::Internal(format!(
                "no interface recorded for network {}; cannot reload",
                network.id
            ))
        })?;
        self.spawn_or_reload(network, &interface, true).await?;
        self.devices.update(network, &interface).await?;

        counter!("subnetd_dhcp_reload_total").increment(1);
        Ok(())
    }

    /// Regenerate artifacts and hand the spawn command to the monitor.
    async fn spawn_or_reload(
        &self,
        network: &Network,
        interface: &str,
        reload: bool,
    ) -> Result<()> {
        let writer = self.writer(&network.id);

        let iface_ips = if self.conf.enable_isolated_metadata {
            self.devices.subnet_interface_ip_map(network, interface).await?
        } else {
            HashMap::new()
        };
        writer.output_config_files(network, &iface_ips)?;

        let mut env = HashMap::new();
        env.insert(NETWORK_ID_KEY.to_string(), network.id.clone());

        let service = self.monitored(network);
        let interface = interface.to_string();
        let network = network.clone();
        self.monitor
            .enable(
                &service,
                env,
                reload,
                &move |pid_file| writer.build_cmdline(&network, &interface, pid_file),
            )
            .await
    }

    /// Release leases whose (ip, mac) pair no longer appears in the
    /// snapshot, comparing against the previously written lease file.
    async fn release_unused_leases(&self, network: &Network) -> Result<()> {
        let writer = self.writer(&network.id);
        let old = writer.read_lease_entries();

        let current: HashSet<(String, String)> = network
            .ports
            .iter()
            .flat_map(|port| {
                port.fixed_ips
                    .iter()
                    .map(move |ip| (ip.ip_address.to_string(), port.mac_address.clone()))
            })
            .collect();

        let stale: Vec<&(String, String)> = old.difference(&current).collect();
        if stale.is_empty() {
            return Ok(());
        }

        let Some(interface) = self.interface_name(&network.id) else {
            warn!("No interface recorded; cannot release stale leases");
            return Ok(());
        };
        let namespace = network.namespace();

        for (ip, mac) in stale {
            debug!(ip = %ip, mac = %mac, "Releasing stale lease");
            self.host_net
                .release_lease(namespace.as_deref(), &interface, ip, mac)
                .await?;
            counter!("subnetd_dhcp_leases_released_total").increment(1);
        }
        Ok(())
    }
}
