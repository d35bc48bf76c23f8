//! dnsmasq configuration generation.
//!
//! Produces the per-network artifacts consumed by dnsmasq: the static lease
//! file (`host`), the resolvable-hosts file (`addn_hosts`), the DHCP options
//! file (`opts`), plus the spawn command line. Every artifact write is
//! atomic so a concurrent reader never observes a half-written file.

use crate::config::AgentConfig;
use crate::dhcp::device::isolated_subnets;
use crate::dhcp::monitor::CommandSpec;
use crate::dhcp::{DNSMASQ_SERVICE_NAME, METADATA_DEFAULT_IP, WIN2K3_STATIC_DNS};
use crate::error::{Result, SubnetdError};
use crate::types::{IpVersion, Ipv6Mode, Network, Port, DEVICE_OWNER_DHCP};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Synthetic tag attached to all lines targeting subnet index `i`.
fn subnet_tag(index: usize) -> String {
    format!("tag{}", index)
}

/// Atomically replace `path` with `contents` (write-temp-then-rename).
pub fn replace_file(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().ok_or_else(|| SubnetdError::Internal(
        format!("config path {:?} has no parent directory", path),
    ))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| SubnetdError::IoError { path: dir.to_path_buf(), source: e })?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| SubnetdError::IoError { path: path.to_path_buf(), source: e })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = tmp.as_file().set_permissions(std::fs::Permissions::from_mode(0o644));
    }
    tmp.persist(path)
        .map_err(|e| SubnetdError::IoError { path: path.to_path_buf(), source: e.error })?;
    Ok(())
}

/// One (port, allocation) pair with its derived names.
struct HostEntry<'a> {
    port: &'a Port,
    subnet_id: &'a str,
    ip: IpAddr,
    hostname: String,
    fqdn: String,
}

/// Writes the dnsmasq artifacts for one network.
#[derive(Clone)]
pub struct ConfigWriter {
    conf: AgentConfig,
    network_conf_dir: PathBuf,
}

impl ConfigWriter {
    pub fn new(conf: AgentConfig, network_id: &str) -> Self {
        let network_conf_dir = conf.dhcp_confs.join(network_id);
        Self { conf, network_conf_dir }
    }

    /// Path of a config artifact of the given kind (`pid`, `host`, ...).
    pub fn conf_file_name(&self, kind: &str) -> PathBuf {
        self.network_conf_dir.join(kind)
    }

    /// Directory holding this network's artifacts.
    pub fn network_conf_dir(&self) -> &Path {
        &self.network_conf_dir
    }

    /// Rewrite the three generated artifacts from the snapshot.
    ///
    /// `subnet_interface_ips` maps subnet id to the agent interface's own
    /// address on that subnet; only consulted for isolated-metadata routes.
    pub fn output_config_files(
        &self,
        network: &Network,
        subnet_interface_ips: &HashMap<String, IpAddr>,
    ) -> Result<()> {
        self.output_hosts_file(network)?;
        self.output_addn_hosts_file(network)?;
        self.output_opts_file(network, subnet_interface_ips)?;
        Ok(())
    }

    /// Iterate over (port, allocation) pairs the server should know about.
    ///
    /// IPv6 allocations are skipped unless their subnet runs in stateful
    /// mode; a SLAAC host picks its own address and must not appear here.
    fn iter_hosts<'a>(&self, network: &'a Network) -> Vec<HostEntry<'a>> {
        let v6_modes: HashMap<&str, Option<Ipv6Mode>> = network
            .subnets
            .iter()
            .filter(|s| s.ip_version == IpVersion::V6)
            .map(|s| (s.id.as_str(), s.ipv6_address_mode))
            .collect();

        let mut entries = Vec::new();
        for port in &network.ports {
            for alloc in &port.fixed_ips {
                if let Some(mode) = v6_modes.get(alloc.subnet_id.as_str()) {
                    if *mode != Some(Ipv6Mode::Dhcpv6Stateful) {
                        continue;
                    }
                }
                let hostname = format!(
                    "host-{}",
                    alloc.ip_address.to_string().replace(['.', ':'], "-")
                );
                let fqdn = match &self.conf.dhcp_domain {
                    Some(domain) => format!("{}.{}", hostname, domain),
                    None => hostname.clone(),
                };
                entries.push(HostEntry {
                    port,
                    subnet_id: alloc.subnet_id.as_str(),
                    ip: alloc.ip_address,
                    hostname,
                    fqdn,
                });
            }
        }
        entries
    }

    /// Write the static lease file consumed via `--dhcp-hostsfile`.
    ///
    /// One `mac,fqdn,ip[,tag:port-id]` line per eligible allocation. The
    /// per-port tag is appended only when the port carries extra DHCP
    /// options, so option lines can target it.
    pub fn output_hosts_file(&self, network: &Network) -> Result<PathBuf> {
        let filename = self.conf_file_name("host");
        debug!("Building host file: {:?}", filename);

        let dhcp_enabled: HashSet<&str> = network
            .subnets
            .iter()
            .filter(|s| s.enable_dhcp)
            .map(|s| s.id.as_str())
            .collect();

        let mut buf = String::new();
        for entry in self.iter_hosts(network) {
            // Allocations on DHCP-disabled subnets never get a lease.
            if !dhcp_enabled.contains(entry.subnet_id) {
                continue;
            }
            // Bracket IPv6 so dnsmasq can tell it apart from a MAC address.
            let ip = literal_addr(&entry.ip);
            if entry.port.extra_dhcp_opts.is_empty() {
                buf.push_str(&format!("{},{},{}\n", entry.port.mac_address, entry.fqdn, ip));
            } else {
                buf.push_str(&format!(
                    "{},{},{},tag:{}\n",
                    entry.port.mac_address, entry.fqdn, ip, entry.port.id
                ));
            }
        }

        replace_file(&filename, &buf)?;
        debug!("Done building host file {:?}", filename);
        Ok(filename)
    }

    /// Write the `/etc/hosts`-style file consumed via `--addn-hosts`.
    ///
    /// Lists every allocation regardless of lease eligibility. The fqdn must
    /// precede the short hostname so PTR responses return the fqdn.
    pub fn output_addn_hosts_file(&self, network: &Network) -> Result<PathBuf> {
        let mut buf = String::new();
        for entry in self.iter_hosts(network) {
            buf.push_str(&format!("{}\t{} {}\n", entry.ip, entry.fqdn, entry.hostname));
        }
        let filename = self.conf_file_name("addn_hosts");
        replace_file(&filename, &buf)?;
        Ok(filename)
    }

    /// Write the options file consumed via `--dhcp-optsfile`.
    pub fn output_opts_file(
        &self,
        network: &Network,
        subnet_interface_ips: &HashMap<String, IpAddr>,
    ) -> Result<PathBuf> {
        let mut options: Vec<String> = Vec::new();
        let isolated = isolated_subnets(network);

        // Subnets that did not declare nameservers get the agent addresses
        // collected after the port loop, keyed by subnet index.
        let mut agent_dns_subnets: HashMap<&str, usize> = HashMap::new();
        let mut dhcp_ips: BTreeMap<usize, Vec<IpAddr>> = BTreeMap::new();

        for (i, subnet) in network.subnets.iter().enumerate() {
            if !subnet.enable_dhcp
                || (subnet.ip_version == IpVersion::V6
                    && matches!(subnet.ipv6_address_mode, None | Some(Ipv6Mode::Slaac)))
            {
                continue;
            }

            if !subnet.dns_nameservers.is_empty() {
                let servers: Vec<String> =
                    subnet.dns_nameservers.iter().map(literal_addr).collect();
                options.push(format_option(
                    subnet.ip_version,
                    &subnet_tag(i),
                    "dns-server",
                    &[servers.join(",")],
                ));
            } else {
                agent_dns_subnets.insert(subnet.id.as_str(), i);
            }

            if subnet.ip_version == IpVersion::V6 {
                if let Some(domain) = &self.conf.dhcp_domain {
                    options.push(format!("tag:{},option6:domain-search,{}", subnet_tag(i), domain));
                }
            }

            // A declared default route becomes the gateway value instead of a
            // generic host route.
            let mut gateway = subnet.gateway_ip;
            let mut host_routes: Vec<String> = Vec::new();
            for hr in &subnet.host_routes {
                if hr.destination.to_string() == "0.0.0.0/0" {
                    if gateway.is_none() {
                        gateway = Some(hr.nexthop);
                    }
                } else {
                    host_routes.push(format!("{},{}", hr.destination, hr.nexthop));
                }
            }

            // Isolated IPv4 subnets reach the metadata service through the
            // agent's own interface address.
            if self.conf.enable_isolated_metadata
                && subnet.ip_version == IpVersion::V4
                && isolated.get(subnet.id.as_str()).copied().unwrap_or(true)
            {
                if let Some(agent_ip) = subnet_interface_ips.get(subnet.id.as_str()) {
                    host_routes.push(format!("{}/32,{}", METADATA_DEFAULT_IP, agent_ip));
                } else {
                    debug!(
                        subnet_id = %subnet.id,
                        "No agent address on isolated subnet; skipping metadata route"
                    );
                }
            }

            if subnet.ip_version == IpVersion::V4 {
                if !host_routes.is_empty() {
                    if let Some(gw) = gateway {
                        host_routes.push(format!("0.0.0.0/0,{}", gw));
                    }
                    let joined = host_routes.join(",");
                    options.push(format_option(
                        IpVersion::V4,
                        &subnet_tag(i),
                        "classless-static-route",
                        &[joined.clone()],
                    ));
                    options.push(format_option(
                        IpVersion::V4,
                        &subnet_tag(i),
                        &WIN2K3_STATIC_DNS.to_string(),
                        &[joined],
                    ));
                }

                match gateway {
                    Some(gw) => options.push(format_option(
                        IpVersion::V4,
                        &subnet_tag(i),
                        "router",
                        &[gw.to_string()],
                    )),
                    // An empty router option explicitly suppresses a router.
                    None => options.push(format_option(
                        IpVersion::V4,
                        &subnet_tag(i),
                        "router",
                        &[],
                    )),
                }
            }
        }

        for port in &network.ports {
            if !port.extra_dhcp_opts.is_empty() {
                // Extra options apply once per IP version present on the port.
                for version in [IpVersion::V4, IpVersion::V6] {
                    if port.fixed_ips.iter().any(|ip| version.matches(&ip.ip_address)) {
                        for opt in &port.extra_dhcp_opts {
                            options.push(format_option(
                                version,
                                &port.id,
                                &opt.opt_name,
                                &[opt.opt_value.clone()],
                            ));
                        }
                    }
                }
            }

            // Collect agent addresses so a subnet served by several agents
            // advertises all of them as nameservers.
            if port.device_owner == DEVICE_OWNER_DHCP {
                for ip in &port.fixed_ips {
                    if let Some(&i) = agent_dns_subnets.get(ip.subnet_id.as_str()) {
                        dhcp_ips.entry(i).or_default().push(ip.ip_address);
                    }
                }
            }
        }

        for (i, ips) in &dhcp_ips {
            for version in [IpVersion::V4, IpVersion::V6] {
                let vx: Vec<String> = ips
                    .iter()
                    .filter(|ip| version.matches(ip))
                    .map(literal_addr)
                    .collect();
                if !vx.is_empty() {
                    options.push(format_option(
                        version,
                        &subnet_tag(*i),
                        "dns-server",
                        &[vx.join(",")],
                    ));
                }
            }
        }

        let filename = self.conf_file_name("opts");
        replace_file(&filename, &options.join("\n"))?;
        Ok(filename)
    }

    /// Build the dnsmasq spawn command for this network.
    pub fn build_cmdline(
        &self,
        network: &Network,
        interface_name: &str,
        pid_file: &Path,
    ) -> CommandSpec {
        let mut args = vec![
            "--no-hosts".to_string(),
            "--no-resolv".to_string(),
            "--strict-order".to_string(),
            "--bind-interfaces".to_string(),
            format!("--interface={}", interface_name),
            "--except-interface=lo".to_string(),
            format!("--pid-file={}", pid_file.display()),
            format!("--dhcp-hostsfile={}", self.conf_file_name("host").display()),
            format!("--addn-hosts={}", self.conf_file_name("addn_hosts").display()),
            format!("--dhcp-optsfile={}", self.conf_file_name("opts").display()),
            "--leasefile-ro".to_string(),
            "--dhcp-authoritative".to_string(),
        ];

        let lease = if self.conf.dhcp_lease_duration == -1 {
            "infinite".to_string()
        } else {
            format!("{}s", self.conf.dhcp_lease_duration)
        };

        let mut possible_leases: u128 = 0;
        for (i, subnet) in network.subnets.iter().enumerate() {
            if !subnet.enable_dhcp {
                continue;
            }
            let mode = match subnet.ip_version {
                IpVersion::V4 => Some("static"),
                // Unset modes fall back to static to preserve legacy
                // behavior; SLAAC-only subnets are left to the router.
                IpVersion::V6 => match (subnet.ipv6_address_mode, subnet.ipv6_ra_mode) {
                    (Some(Ipv6Mode::Dhcpv6Stateful), _)
                    | (Some(Ipv6Mode::Dhcpv6Stateless), _)
                    | (None, None) => Some("static"),
                    _ => None,
                },
            };
            let Some(mode) = mode else { continue };

            let net_addr = subnet.cidr.network();
            let prefix = subnet.cidr.prefix_len();
            match subnet.ip_version {
                IpVersion::V4 => args.push(format!(
                    "--dhcp-range=set:{},{},{},{}",
                    subnet_tag(i),
                    net_addr,
                    mode,
                    lease
                )),
                IpVersion::V6 => args.push(format!(
                    "--dhcp-range=set:{},{},{},{},{}",
                    subnet_tag(i),
                    net_addr,
                    mode,
                    prefix,
                    lease
                )),
            }

            let bits = u32::from(subnet.cidr.max_prefix_len() - prefix);
            possible_leases =
                possible_leases.saturating_add(1u128.checked_shl(bits).unwrap_or(u128::MAX));
        }

        // Creating lots of subnets can inflate the possible lease count.
        let lease_max = possible_leases.min(u128::from(self.conf.dnsmasq_lease_max));
        args.push(format!("--dhcp-lease-max={}", lease_max));

        args.push(format!("--conf-file={}", self.conf.dnsmasq_config_file));
        for server in &self.conf.dnsmasq_dns_servers {
            args.push(format!("--server={}", server));
        }
        if let Some(domain) = &self.conf.dhcp_domain {
            args.push(format!("--domain={}", domain));
        }
        if self.conf.dhcp_broadcast_reply {
            args.push("--dhcp-broadcast".to_string());
        }

        CommandSpec { program: DNSMASQ_SERVICE_NAME.to_string(), args, env: Vec::new() }
    }

    /// Parse the previously written static lease file into (ip, mac) pairs.
    ///
    /// A missing or unreadable file yields the empty set; reload must
    /// tolerate partially initialized state directories.
    pub fn read_lease_entries(&self) -> HashSet<(String, String)> {
        let filename = self.conf_file_name("host");
        let mut leases = HashSet::new();
        let content = match std::fs::read_to_string(&filename) {
            Ok(content) => content,
            Err(_) => return leases,
        };
        for line in content.lines() {
            let fields: Vec<&str> = line.trim().split(',').collect();
            if fields.len() < 3 {
                continue;
            }
            let raw_ip = fields[2].trim_matches(|c| c == '[' || c == ']');
            // Canonicalize so set comparison is insensitive to IPv6 spelling.
            let ip = raw_ip
                .parse::<IpAddr>()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|_| raw_ip.to_string());
            leases.insert((ip, fields[0].to_string()));
        }
        leases
    }
}

/// Bracket IPv6 addresses so they cannot be mistaken for MAC addresses.
fn literal_addr(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

/// Format one options-file line.
///
/// Numeric option codes pass through untouched; symbolic names get an
/// `option:`/`option6:` prefix depending on IP version. An embedded
/// `tag:<name>,` prefix inside `option` is preserved after the primary tag.
fn format_option(ip_version: IpVersion, tag: &str, option: &str, args: &[String]) -> String {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    let re = TAG_RE.get_or_init(|| Regex::new(r"^(tag:(.*),)?(.*)$").expect("valid pattern"));

    let caps = re.captures(option);
    let (extra_tag, option) = match &caps {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str()),
            caps.get(3).map(|m| m.as_str()).unwrap_or(option),
        ),
        None => (None, option),
    };

    let token = if !option.is_empty() && option.bytes().all(|b| b.is_ascii_digit()) {
        option.to_string()
    } else {
        match ip_version {
            IpVersion::V4 => format!("option:{}", option),
            IpVersion::V6 => format!("option6:{}", option),
        }
    };

    let mut parts = vec![format!("tag:{}", tag)];
    if let Some(extra) = extra_tag {
        parts.push(extra.trim_end_matches(',').to_string());
    }
    parts.push(token);
    parts.extend(args.iter().cloned());
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExtraDhcpOpt, FixedIp, HostRoute, Network, Port, Subnet};
    use tempfile::TempDir;

    fn test_conf(dir: &TempDir) -> AgentConfig {
        AgentConfig { dhcp_confs: dir.path().to_path_buf(), ..Default::default() }
    }

    fn v4_subnet(id: &str, cidr: &str, gateway: Option<&str>) -> Subnet {
        Subnet {
            id: id.to_string(),
            ip_version: IpVersion::V4,
            cidr: cidr.parse().unwrap(),
            enable_dhcp: true,
            gateway_ip: gateway.map(|g| g.parse().unwrap()),
            dns_nameservers: vec![],
            host_routes: vec![],
            ipv6_address_mode: None,
            ipv6_ra_mode: None,
        }
    }

    fn v6_subnet(id: &str, cidr: &str, mode: Option<Ipv6Mode>) -> Subnet {
        Subnet {
            id: id.to_string(),
            ip_version: IpVersion::V6,
            cidr: cidr.parse().unwrap(),
            enable_dhcp: true,
            gateway_ip: None,
            dns_nameservers: vec![],
            host_routes: vec![],
            ipv6_address_mode: mode,
            ipv6_ra_mode: mode,
        }
    }

    fn port(id: &str, mac: &str, allocs: &[(&str, &str)]) -> Port {
        Port {
            id: id.to_string(),
            mac_address: mac.to_string(),
            device_owner: "compute:nova".to_string(),
            device_id: Some(format!("dev-{}", id)),
            fixed_ips: allocs
                .iter()
                .map(|(subnet_id, ip)| FixedIp {
                    subnet_id: subnet_id.to_string(),
                    ip_address: ip.parse().unwrap(),
                })
                .collect(),
            extra_dhcp_opts: vec![],
            tenant_id: "tenant".to_string(),
        }
    }

    fn network(subnets: Vec<Subnet>, ports: Vec<Port>) -> Network {
        Network {
            id: "net-1".to_string(),
            tenant_id: "tenant".to_string(),
            subnets,
            ports,
            use_namespaces: true,
        }
    }

    fn writer(dir: &TempDir) -> ConfigWriter {
        let conf = test_conf(dir);
        let writer = ConfigWriter::new(conf, "net-1");
        std::fs::create_dir_all(writer.network_conf_dir()).unwrap();
        writer
    }

    #[test]
    fn test_hosts_file_basic() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let net = network(
            vec![v4_subnet("s1", "10.0.0.0/24", Some("10.0.0.1"))],
            vec![port("p1", "aa:bb:cc:dd:ee:ff", &[("s1", "10.0.0.5")])],
        );

        let path = writer.output_hosts_file(&net).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content, "aa:bb:cc:dd:ee:ff,host-10-0-0-5,10.0.0.5\n");
    }

    #[test]
    fn test_hosts_file_excludes_dhcp_disabled_subnet() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let mut disabled = v4_subnet("s2", "10.1.0.0/24", None);
        disabled.enable_dhcp = false;
        let net = network(
            vec![v4_subnet("s1", "10.0.0.0/24", None), disabled],
            vec![port("p1", "aa:bb:cc:dd:ee:ff", &[("s1", "10.0.0.5"), ("s2", "10.1.0.5")])],
        );

        let path = writer.output_hosts_file(&net).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("10.0.0.5"));
        assert!(!content.contains("10.1.0.5"));
    }

    #[test]
    fn test_hosts_file_excludes_slaac_only_v6() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let net = network(
            vec![
                v6_subnet("s6", "fdca:3ba5:a17a:4ba3::/64", Some(Ipv6Mode::Slaac)),
                v6_subnet("s6s", "fdca:3ba5:a17a:4ba4::/64", Some(Ipv6Mode::Dhcpv6Stateful)),
            ],
            vec![port(
                "p1",
                "aa:bb:cc:dd:ee:ff",
                &[
                    ("s6", "fdca:3ba5:a17a:4ba3::2"),
                    ("s6s", "fdca:3ba5:a17a:4ba4::2"),
                ],
            )],
        );

        let path = writer.output_hosts_file(&net).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(!content.contains("4ba3::2"));
        // Stateful address is present and bracketed.
        assert!(content.contains("[fdca:3ba5:a17a:4ba4::2]"));
    }

    #[test]
    fn test_hosts_file_tag_iff_extra_opts() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let mut tagged = port("p2", "11:22:33:44:55:66", &[("s1", "10.0.0.6")]);
        tagged.extra_dhcp_opts =
            vec![ExtraDhcpOpt { opt_name: "tftp-server".to_string(), opt_value: "10.0.0.9".to_string() }];
        let net = network(
            vec![v4_subnet("s1", "10.0.0.0/24", None)],
            vec![port("p1", "aa:bb:cc:dd:ee:ff", &[("s1", "10.0.0.5")]), tagged],
        );

        let path = writer.output_hosts_file(&net).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("aa:bb:cc:dd:ee:ff,host-10-0-0-5,10.0.0.5\n"));
        assert!(content.contains("11:22:33:44:55:66,host-10-0-0-6,10.0.0.6,tag:p2\n"));
    }

    #[test]
    fn test_addn_hosts_fqdn_first() {
        let dir = TempDir::new().unwrap();
        let mut conf = test_conf(&dir);
        conf.dhcp_domain = Some("example.org".to_string());
        let writer = ConfigWriter::new(conf, "net-1");
        std::fs::create_dir_all(writer.network_conf_dir()).unwrap();
        let net = network(
            vec![v4_subnet("s1", "10.0.0.0/24", None)],
            vec![port("p1", "aa:bb:cc:dd:ee:ff", &[("s1", "10.0.0.5")])],
        );

        let path = writer.output_addn_hosts_file(&net).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content, "10.0.0.5\thost-10-0-0-5.example.org host-10-0-0-5\n");
    }

    #[test]
    fn test_opts_file_router_option() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let net = network(vec![v4_subnet("s1", "10.0.0.0/24", Some("10.0.0.1"))], vec![]);

        let path = writer.output_opts_file(&net, &HashMap::new()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content, "tag:tag0,option:router,10.0.0.1");
    }

    #[test]
    fn test_opts_file_empty_router_suppresses_gateway() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let net = network(vec![v4_subnet("s1", "10.0.0.0/24", None)], vec![]);

        let path = writer.output_opts_file(&net, &HashMap::new()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content, "tag:tag0,option:router");
    }

    #[test]
    fn test_opts_file_host_routes_and_default_route_extraction() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let mut subnet = v4_subnet("s1", "10.0.0.0/24", None);
        subnet.host_routes = vec![
            HostRoute {
                destination: "0.0.0.0/0".parse().unwrap(),
                nexthop: "10.0.0.1".parse().unwrap(),
            },
            HostRoute {
                destination: "192.168.1.0/24".parse().unwrap(),
                nexthop: "10.0.0.9".parse().unwrap(),
            },
        ];
        let net = network(vec![subnet], vec![]);

        let path = writer.output_opts_file(&net, &HashMap::new()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines.contains(
            &"tag:tag0,option:classless-static-route,192.168.1.0/24,10.0.0.9,0.0.0.0/0,10.0.0.1"
        ));
        assert!(lines
            .contains(&"tag:tag0,249,192.168.1.0/24,10.0.0.9,0.0.0.0/0,10.0.0.1"));
        // The extracted default route becomes the router value.
        assert!(lines.contains(&"tag:tag0,option:router,10.0.0.1"));
    }

    #[test]
    fn test_opts_file_isolated_metadata_route() {
        let dir = TempDir::new().unwrap();
        let mut conf = test_conf(&dir);
        conf.enable_isolated_metadata = true;
        let writer = ConfigWriter::new(conf, "net-1");
        std::fs::create_dir_all(writer.network_conf_dir()).unwrap();
        let net = network(vec![v4_subnet("s1", "10.0.0.0/24", Some("10.0.0.1"))], vec![]);

        let mut iface_ips = HashMap::new();
        iface_ips.insert("s1".to_string(), "10.0.0.2".parse().unwrap());
        let path = writer.output_opts_file(&net, &iface_ips).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("169.254.169.254/32,10.0.0.2"));
    }

    #[test]
    fn test_opts_file_agent_addresses_as_nameservers() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let mut agent1 = port("a1", "aa:aa:aa:aa:aa:01", &[("s1", "10.0.0.2")]);
        agent1.device_owner = DEVICE_OWNER_DHCP.to_string();
        let mut agent2 = port("a2", "aa:aa:aa:aa:aa:02", &[("s1", "10.0.0.3")]);
        agent2.device_owner = DEVICE_OWNER_DHCP.to_string();
        let net = network(
            vec![v4_subnet("s1", "10.0.0.0/24", Some("10.0.0.1"))],
            vec![agent1, agent2],
        );

        let path = writer.output_opts_file(&net, &HashMap::new()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("tag:tag0,option:dns-server,10.0.0.2,10.0.0.3"));
    }

    #[test]
    fn test_opts_file_declared_nameservers_win() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let mut subnet = v4_subnet("s1", "10.0.0.0/24", Some("10.0.0.1"));
        subnet.dns_nameservers = vec!["8.8.8.8".parse().unwrap()];
        let mut agent = port("a1", "aa:aa:aa:aa:aa:01", &[("s1", "10.0.0.2")]);
        agent.device_owner = DEVICE_OWNER_DHCP.to_string();
        let net = network(vec![subnet], vec![agent]);

        let path = writer.output_opts_file(&net, &HashMap::new()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("tag:tag0,option:dns-server,8.8.8.8"));
        // Agent address must not also be advertised.
        assert!(!content.contains("10.0.0.2"));
    }

    #[test]
    fn test_opts_file_extra_port_options() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let mut tagged = port("p1", "aa:bb:cc:dd:ee:ff", &[("s1", "10.0.0.5")]);
        tagged.extra_dhcp_opts = vec![ExtraDhcpOpt {
            opt_name: "bootfile-name".to_string(),
            opt_value: "pxelinux.0".to_string(),
        }];
        let net = network(vec![v4_subnet("s1", "10.0.0.0/24", None)], vec![tagged]);

        let path = writer.output_opts_file(&net, &HashMap::new()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("tag:p1,option:bootfile-name,pxelinux.0"));
    }

    #[test]
    fn test_format_option_variants() {
        assert_eq!(
            format_option(IpVersion::V4, "tag0", "router", &["10.0.0.1".to_string()]),
            "tag:tag0,option:router,10.0.0.1"
        );
        assert_eq!(format_option(IpVersion::V4, "tag0", "router", &[]), "tag:tag0,option:router");
        assert_eq!(
            format_option(IpVersion::V6, "tag1", "dns-server", &["[2001:db8::1]".to_string()]),
            "tag:tag1,option6:dns-server,[2001:db8::1]"
        );
        // Numeric codes pass through unprefixed.
        assert_eq!(
            format_option(IpVersion::V4, "tag0", "249", &["10.0.0.0/24,10.0.0.1".to_string()]),
            "tag:tag0,249,10.0.0.0/24,10.0.0.1"
        );
        // Embedded tag prefixes are preserved after the primary tag.
        assert_eq!(
            format_option(IpVersion::V4, "p1", "tag:ipxe,bootfile-name", &["http://x".to_string()]),
            "tag:p1,tag:ipxe,option:bootfile-name,http://x"
        );
    }

    #[test]
    fn test_cmdline_basic() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let net = network(vec![v4_subnet("s1", "10.0.0.0/24", Some("10.0.0.1"))], vec![]);

        let spec = writer.build_cmdline(&net, "tap0", Path::new("/run/pid"));
        assert_eq!(spec.program, "dnsmasq");
        assert!(spec.args.contains(&"--no-hosts".to_string()));
        assert!(spec.args.contains(&"--interface=tap0".to_string()));
        assert!(spec.args.contains(&"--dhcp-range=set:tag0,10.0.0.0,static,86400s".to_string()));
        assert!(spec.args.contains(&"--dhcp-lease-max=256".to_string()));
        assert!(!spec.args.iter().any(|a| a.starts_with("--dhcp-broadcast")));
    }

    #[test]
    fn test_cmdline_lease_max_capped() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let net = network(vec![v4_subnet("s1", "10.0.0.0/8", None)], vec![]);

        let spec = writer.build_cmdline(&net, "tap0", Path::new("/run/pid"));
        // A /8 has 2^24 addresses; the cap keeps the flag at the ceiling.
        assert!(spec.args.contains(&"--dhcp-lease-max=16777216".to_string()));
    }

    #[test]
    fn test_cmdline_v6_range_and_infinite_lease() {
        let dir = TempDir::new().unwrap();
        let mut conf = test_conf(&dir);
        conf.dhcp_lease_duration = -1;
        let writer = ConfigWriter::new(conf, "net-1");
        std::fs::create_dir_all(writer.network_conf_dir()).unwrap();
        let net = network(
            vec![v6_subnet("s6", "fdca:3ba5:a17a:4ba3::/64", Some(Ipv6Mode::Dhcpv6Stateful))],
            vec![],
        );

        let spec = writer.build_cmdline(&net, "tap0", Path::new("/run/pid"));
        assert!(spec.args.contains(
            &"--dhcp-range=set:tag0,fdca:3ba5:a17a:4ba3::,static,64,infinite".to_string()
        ));
    }

    #[test]
    fn test_cmdline_skips_slaac_subnet() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let net = network(
            vec![v6_subnet("s6", "fdca:3ba5:a17a:4ba3::/64", Some(Ipv6Mode::Slaac))],
            vec![],
        );

        let spec = writer.build_cmdline(&net, "tap0", Path::new("/run/pid"));
        assert!(!spec.args.iter().any(|a| a.starts_with("--dhcp-range")));
        assert!(spec.args.contains(&"--dhcp-lease-max=0".to_string()));
    }

    #[test]
    fn test_cmdline_optional_flags() {
        let dir = TempDir::new().unwrap();
        let mut conf = test_conf(&dir);
        conf.dnsmasq_dns_servers = vec!["8.8.8.8".parse().unwrap()];
        conf.dhcp_domain = Some("example.org".to_string());
        conf.dhcp_broadcast_reply = true;
        let writer = ConfigWriter::new(conf, "net-1");
        std::fs::create_dir_all(writer.network_conf_dir()).unwrap();
        let net = network(vec![], vec![]);

        let spec = writer.build_cmdline(&net, "tap0", Path::new("/run/pid"));
        assert!(spec.args.contains(&"--server=8.8.8.8".to_string()));
        assert!(spec.args.contains(&"--domain=example.org".to_string()));
        assert!(spec.args.contains(&"--dhcp-broadcast".to_string()));
    }

    #[test]
    fn test_output_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let mut tagged = port("p2", "11:22:33:44:55:66", &[("s1", "10.0.0.6")]);
        tagged.extra_dhcp_opts = vec![ExtraDhcpOpt {
            opt_name: "tftp-server".to_string(),
            opt_value: "10.0.0.9".to_string(),
        }];
        let net = network(
            vec![
                v4_subnet("s1", "10.0.0.0/24", Some("10.0.0.1")),
                v6_subnet("s6", "fdca:3ba5:a17a:4ba3::/64", Some(Ipv6Mode::Dhcpv6Stateful)),
            ],
            vec![port("p1", "aa:bb:cc:dd:ee:ff", &[("s1", "10.0.0.5")]), tagged],
        );

        writer.output_config_files(&net, &HashMap::new()).unwrap();
        let first: Vec<String> = ["host", "addn_hosts", "opts"]
            .iter()
            .map(|k| std::fs::read_to_string(writer.conf_file_name(k)).unwrap())
            .collect();

        writer.output_config_files(&net, &HashMap::new()).unwrap();
        let second: Vec<String> = ["host", "addn_hosts", "opts"]
            .iter()
            .map(|k| std::fs::read_to_string(writer.conf_file_name(k)).unwrap())
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_read_lease_entries() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        replace_file(
            &writer.conf_file_name("host"),
            "aa:bb:cc:dd:ee:ff,host-10-0-0-5,10.0.0.5\n\
             11:22:33:44:55:66,host-x,[fdca:3ba5:a17a:4ba3::2]\n",
        )
        .unwrap();

        let leases = writer.read_lease_entries();
        assert!(leases.contains(&("10.0.0.5".to_string(), "aa:bb:cc:dd:ee:ff".to_string())));
        assert!(leases
            .contains(&("fdca:3ba5:a17a:4ba3::2".to_string(), "11:22:33:44:55:66".to_string())));
        assert_eq!(leases.len(), 2);
    }

    #[test]
    fn test_read_lease_entries_missing_file() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        assert!(writer.read_lease_entries().is_empty());
    }
}
