//! subnetd command-line entry point.
//!
//! Besides operator commands, this binary doubles as the dnsmasq
//! `--dhcp-script` hook: dnsmasq execs `subnetd lease-hook <action> <mac>
//! <ip>` with context passed through environment variables.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use subnetd_core::dhcp::hook::{relay_lease_event, LeaseAction, LeaseEvent};
use subnetd_core::dhcp::lifecycle::existing_dhcp_networks;
use subnetd_core::dhcp::{NETWORK_ID_KEY, RELAY_SOCKET_PATH_KEY};
use subnetd_core::{paths, AgentConfig};

#[derive(Parser)]
#[command(name = "subnetd", about = "Host-local DHCP provisioning agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward a dnsmasq lease change to the relay socket.
    ///
    /// Invoked by dnsmasq itself, not by operators.
    LeaseHook {
        /// Lease action reported by dnsmasq (add, del or old).
        action: String,
        /// MAC address of the lease.
        mac_address: String,
        /// IP address of the lease.
        ip_address: String,
    },
    /// List network ids with a config directory on this host.
    Networks,
}

#[tokio::main]
async fn main() -> Result<()> {
    subnetd_core::init_observability()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::LeaseHook { action, mac_address, ip_address } => {
            lease_hook(&action, mac_address, ip_address).await
        }
        Commands::Networks => {
            let conf = AgentConfig::load()?;
            for network_id in existing_dhcp_networks(&conf) {
                println!("{}", network_id);
            }
            Ok(())
        }
    }
}

async fn lease_hook(action: &str, mac_address: String, ip_address: String) -> Result<()> {
    // dnsmasq may invoke the script with actions we do not handle (tftp,
    // arp-add, ...); those must exit cleanly without output.
    let Ok(action) = action.parse::<LeaseAction>() else {
        tracing::debug!(action = %action, "Ignoring unhandled lease-hook action");
        return Ok(());
    };

    let network_id = std::env::var(NETWORK_ID_KEY)
        .with_context(|| format!("{} not set; not running under subnetd?", NETWORK_ID_KEY))?;
    if network_id.is_empty() {
        bail!("{} is empty", NETWORK_ID_KEY);
    }

    let socket_path = std::env::var(RELAY_SOCKET_PATH_KEY)
        .map(PathBuf::from)
        .unwrap_or_else(|_| paths::relay_socket_path());

    let time_remaining = std::env::var("DNSMASQ_TIME_REMAINING")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let event = LeaseEvent { action, mac_address, ip_address, time_remaining };
    relay_lease_event(&network_id, &socket_path, &event).await?;
    Ok(())
}
