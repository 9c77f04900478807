//! Interface inspection and static address assignment.

use crate::{
    config::PathConfig,
    network_probe::NetworkProbe,
    services::{
        dhcpcd::{DhcpcdConfig, InterfaceBlock, StaticSettings},
        error::ServiceError,
        fs::{read_optional, write_atomic},
    },
};
use anyhow::{Result, bail};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{net::Ipv4Addr, path::Path, sync::LazyLock};

/// Prefix length written for every static address.
const STATIC_PREFIX_LEN: u8 = 24;

static INET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"inet (\d+\.\d+\.\d+\.\d+)").expect("invalid inet regex")
});

static DEFAULT_ROUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"default via (\d+\.\d+\.\d+\.\d+)").expect("invalid default route regex")
});

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InterfaceStatus {
    pub interface: String,
    pub ip_address: Option<String>,
    pub gateway: Option<String>,
    pub dns: Vec<String>,
}

/// DNS servers as sent by the UI: either one string separated by spaces or
/// commas, or a list.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum DnsServers {
    Text(String),
    List(Vec<String>),
}

impl DnsServers {
    fn entries(&self) -> Vec<&str> {
        match self {
            DnsServers::Text(text) => split_servers(text).collect(),
            DnsServers::List(list) => list.iter().flat_map(|e| split_servers(e)).collect(),
        }
    }
}

fn split_servers(servers: &str) -> impl Iterator<Item = &str> {
    servers
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|e| !e.is_empty())
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SaveHardwareRequest {
    #[serde(rename = "ethernetLabel", default)]
    pub ethernet_label: Option<String>,
    #[serde(default)]
    pub hardware_ip: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub dns: Option<DnsServers>,
}

/// Validated form of [`SaveHardwareRequest`].
#[derive(Clone, Debug, PartialEq)]
struct StaticIpConfig {
    interface: String,
    ip: Ipv4Addr,
    gateway: Ipv4Addr,
    dns: Vec<Ipv4Addr>,
}

pub struct InterfaceService;

impl InterfaceService {
    /// Report address, gateway and DNS servers of `interface`.
    ///
    /// Static settings from the dhcpcd file take precedence per field. Only
    /// a failing live query without a static address is an error; every
    /// other lookup degrades to an empty value.
    pub async fn status<P>(
        probe: &P,
        paths: &PathConfig,
        interface: &str,
    ) -> Result<InterfaceStatus>
    where
        P: NetworkProbe,
    {
        let interface = interface.trim();
        if interface.is_empty() {
            bail!(ServiceError::invalid_input("missing 'iface' parameter"));
        }

        if !is_valid_interface_name(interface) {
            bail!(ServiceError::invalid_input(format!(
                "invalid interface name: {interface:?}"
            )));
        }

        let settings = Self::static_settings(&paths.dhcpcd_conf, interface);
        debug!("static settings of {interface}: {settings:?}");

        let ip_address = match settings.ip_address {
            Some(ip) => Some(ip),
            None => match probe.interface_info(interface).await {
                Ok(info) => parse_inet_address(&info),
                Err(e) => {
                    warn!("interface query for {interface} failed: {e:#}");
                    bail!(ServiceError::not_found(format!(
                        "Interface '{interface}' not found or inactive"
                    )));
                }
            },
        };

        let gateway = match settings.router {
            Some(router) => Some(router),
            None => match probe.routes().await {
                Ok(routes) => parse_default_gateway(&routes),
                Err(e) => {
                    warn!("route query failed: {e:#}");
                    None
                }
            },
        };

        let dns = if settings.domain_name_servers.is_empty() {
            Self::resolver_nameservers(&paths.resolv_conf)
        } else {
            settings.domain_name_servers
        };

        Ok(InterfaceStatus {
            interface: interface.to_string(),
            ip_address,
            gateway,
            dns,
        })
    }

    /// Pin an interface to a static address in the dhcpcd file.
    ///
    /// Existing blocks of the interface are replaced; blocks of other
    /// interfaces are left alone. Callers serialize concurrent edits.
    pub fn save_static(
        paths: &PathConfig,
        default_interface: &str,
        request: &SaveHardwareRequest,
    ) -> Result<String> {
        let config = StaticIpConfig::try_from_request(request, default_interface)?;
        info!("save static config: {config:?}");

        let path = &paths.dhcpcd_conf;
        let current = read_optional(path)?.unwrap_or_default();

        let mut dhcpcd = DhcpcdConfig::parse(&current);
        dhcpcd.replace_block(InterfaceBlock::static_ip(
            &config.interface,
            config.ip,
            STATIC_PREFIX_LEN,
            config.gateway,
            &config.dns,
        ));

        write_atomic(path, dhcpcd.to_string().as_bytes())?;

        Ok(format!(
            "saved and written to {}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned())
        ))
    }

    fn static_settings(path: &Path, interface: &str) -> StaticSettings {
        match read_optional(path) {
            Ok(Some(content)) => DhcpcdConfig::parse(&content).static_settings(interface),
            Ok(None) => StaticSettings::default(),
            Err(e) => {
                warn!("ignoring static config: {e:#}");
                StaticSettings::default()
            }
        }
    }

    fn resolver_nameservers(path: &Path) -> Vec<String> {
        match read_optional(path) {
            Ok(Some(content)) => parse_nameservers(&content),
            Ok(None) => vec![],
            Err(e) => {
                warn!("ignoring resolver config: {e:#}");
                vec![]
            }
        }
    }
}

impl StaticIpConfig {
    fn try_from_request(request: &SaveHardwareRequest, default_interface: &str) -> Result<Self> {
        let interface = match request.ethernet_label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label,
            _ => default_interface,
        };

        if !is_valid_interface_name(interface) {
            bail!(ServiceError::invalid_input(format!(
                "invalid interface name: {interface:?}"
            )));
        }

        let (Some(ip), Some(gateway)) = (
            non_empty(request.hardware_ip.as_deref()),
            non_empty(request.gateway.as_deref()),
        ) else {
            bail!(ServiceError::invalid_input("Missing IP or Gateway"));
        };

        let dns = request
            .dns
            .as_ref()
            .map(DnsServers::entries)
            .unwrap_or_default()
            .into_iter()
            .map(parse_ipv4)
            .collect::<Result<Vec<_>>>()?;

        Ok(StaticIpConfig {
            interface: interface.to_string(),
            ip: parse_ipv4(ip)?,
            gateway: parse_ipv4(gateway)?,
            dns,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_ipv4(value: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse()
        .map_err(|_| ServiceError::invalid_input(format!("invalid IPv4 address: {value:?}")).into())
}

/// Kernel-style interface name; a leading `-` would be read as a command
/// line option.
fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'))
}

/// First IPv4 address in `ifconfig` output.
pub fn parse_inet_address(ifconfig: &str) -> Option<String> {
    INET_RE
        .captures(ifconfig)
        .map(|caps| caps[1].to_string())
}

/// Gateway of the default route in `ip route` output.
pub fn parse_default_gateway(routes: &str) -> Option<String> {
    DEFAULT_ROUTE_RE
        .captures(routes)
        .map(|caps| caps[1].to_string())
}

/// Servers of all `nameserver` lines of a resolver file.
pub fn parse_nameservers(resolv_conf: &str) -> Vec<String> {
    resolv_conf
        .lines()
        .filter(|line| line.starts_with("nameserver"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(String::from)
        .collect()
}
