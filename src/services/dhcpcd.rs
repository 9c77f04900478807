//! Line-oriented model of `dhcpcd.conf`.
//!
//! The file is kept as a preamble followed by an ordered list of
//! `interface` blocks. A block starts at an uncommented line whose first
//! token is `interface` and runs up to the next such line or the end of the
//! file. Interface names are matched as whole tokens, so `eth0` never
//! matches `eth01`.

use std::{fmt, net::Ipv4Addr};

const INTERFACE_KEYWORD: &str = "interface";
const STATIC_KEYWORD: &str = "static";

/// Static directives found in the blocks of one interface.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaticSettings {
    /// Address without its prefix length.
    pub ip_address: Option<String>,
    /// First entry of `static routers=`.
    pub router: Option<String>,
    pub domain_name_servers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceBlock {
    interface: String,
    lines: Vec<String>,
}

impl InterfaceBlock {
    /// Build a block pinning `interface` to a static address.
    pub fn static_ip(
        interface: &str,
        ip: Ipv4Addr,
        prefix_len: u8,
        gateway: Ipv4Addr,
        dns: &[Ipv4Addr],
    ) -> Self {
        let mut lines = vec![
            format!("{INTERFACE_KEYWORD} {interface}"),
            format!("{STATIC_KEYWORD} ip_address={ip}/{prefix_len}"),
            format!("{STATIC_KEYWORD} routers={gateway}"),
        ];

        if !dns.is_empty() {
            let servers = dns
                .iter()
                .map(Ipv4Addr::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            lines.push(format!("{STATIC_KEYWORD} domain_name_servers={servers}"));
        }

        InterfaceBlock {
            interface: interface.to_string(),
            lines,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn static_directives(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().skip(1).filter_map(|line| {
            let rest = line.trim().strip_prefix(STATIC_KEYWORD)?;
            // "static" must be a whole token
            if !rest.starts_with(char::is_whitespace) {
                return None;
            }
            let (key, value) = rest.split_once('=')?;
            Some((key.trim(), value.trim()))
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DhcpcdConfig {
    preamble: Vec<String>,
    blocks: Vec<InterfaceBlock>,
}

impl DhcpcdConfig {
    pub fn parse(text: &str) -> Self {
        let mut config = DhcpcdConfig::default();

        for line in text.lines() {
            if let Some(interface) = block_header(line) {
                config.blocks.push(InterfaceBlock {
                    interface: interface.to_string(),
                    lines: vec![line.to_string()],
                });
            } else if let Some(block) = config.blocks.last_mut() {
                block.lines.push(line.to_string());
            } else {
                config.preamble.push(line.to_string());
            }
        }

        config
    }

    pub fn blocks(&self) -> &[InterfaceBlock] {
        &self.blocks
    }

    /// Collect the static settings of `interface`.
    ///
    /// Later directives override earlier ones when the interface has
    /// several blocks.
    pub fn static_settings(&self, interface: &str) -> StaticSettings {
        let mut settings = StaticSettings::default();

        for block in self.blocks.iter().filter(|b| b.interface == interface) {
            for (key, value) in block.static_directives() {
                match key {
                    "ip_address" => {
                        settings.ip_address = value
                            .split('/')
                            .next()
                            .map(str::trim)
                            .filter(|ip| !ip.is_empty())
                            .map(String::from)
                    }
                    "routers" => {
                        settings.router = value.split_whitespace().next().map(String::from)
                    }
                    "domain_name_servers" => {
                        settings.domain_name_servers =
                            value.split_whitespace().map(String::from).collect()
                    }
                    _ => {}
                }
            }
        }

        settings
    }

    /// Drop every block of `block.interface()` and append `block`.
    pub fn replace_block(&mut self, block: InterfaceBlock) {
        self.remove_blocks(&block.interface);
        self.blocks.push(block);
    }

    /// Remove all blocks of `interface`, returning how many were removed.
    pub fn remove_blocks(&mut self, interface: &str) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|b| b.interface != interface);
        before - self.blocks.len()
    }
}

impl fmt::Display for DhcpcdConfig {
    /// Sections are separated by exactly one blank line and the file ends
    /// with a single newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sections = std::iter::once(&self.preamble)
            .chain(self.blocks.iter().map(|b| &b.lines))
            .map(|lines| lines.join("\n").trim_end().to_string())
            .filter(|section| !section.trim().is_empty())
            .collect::<Vec<_>>();

        if sections.is_empty() {
            return Ok(());
        }

        writeln!(f, "{}", sections.join("\n\n"))
    }
}

fn block_header(line: &str) -> Option<&str> {
    let mut tokens = line.split_whitespace();

    if tokens.next()? != INTERFACE_KEYWORD {
        return None;
    }

    Some(tokens.next().unwrap_or_default())
}
