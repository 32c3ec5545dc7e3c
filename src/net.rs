//! Address and network primitives: IPv4/IPv6 literals, CIDR networks, and
//! reverse-DNS name synthesis.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::ServerError;

/// An IP address plus a port. `0` means "unset"; callers resolve the
/// protocol-default port (53 or 853) lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub ip: IpAddr,
    pub port: u16,
}

impl Address {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn effective_port(&self, protocol: Protocol) -> u16 {
        if self.port != 0 {
            return self.port;
        }
        match protocol {
            Protocol::Tls => 853,
            Protocol::Udp | Protocol::Tcp => 53,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ip)
    }
}

/// Parses a bare IP literal (no brackets, no port). Never performs a name lookup.
pub fn parse_address(s: &str) -> Result<IpAddr, ServerError> {
    IpAddr::from_str(s.trim_start_matches('[').trim_end_matches(']'))
        .map_err(|_| ServerError::InvalidAddress)
}

pub fn format_address(addr: &IpAddr) -> String {
    addr.to_string()
}

/// `Address` + prefix length (0-32 for IPv4, 0-128 for IPv6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Network {
    pub address: IpAddr,
    pub prefix: u8,
}

impl Network {
    /// Parses the `<ip>/<prefix>` form.
    pub fn parse(s: &str) -> Result<Self, ServerError> {
        let (addr_str, prefix_str) = s.split_once('/').ok_or(ServerError::InvalidNetwork)?;
        let address = parse_address(addr_str)?;
        let prefix: u8 = prefix_str
            .parse()
            .map_err(|_| ServerError::InvalidNetwork)?;
        let max_prefix = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max_prefix {
            return Err(ServerError::InvalidNetwork);
        }
        Ok(Self { address, prefix })
    }

    /// Synthesizes the reverse-DNS domain name for this network, truncating
    /// the prefix down to the nearest octet (IPv4) or nibble (IPv6) boundary.
    pub fn to_reverse_dns(&self) -> String {
        match self.address {
            IpAddr::V4(v4) => reverse_dns_ipv4(v4, self.prefix),
            IpAddr::V6(v6) => reverse_dns_ipv6(v6, self.prefix),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

fn reverse_dns_ipv4(addr: Ipv4Addr, prefix: u8) -> String {
    let octets = addr.octets();
    let whole_octets = (prefix / 8) as usize;
    let mut labels: Vec<String> = octets[..whole_octets]
        .iter()
        .rev()
        .map(|b| b.to_string())
        .collect();
    labels.push("in-addr.arpa".to_string());
    labels.join(".")
}

fn reverse_dns_ipv6(addr: Ipv6Addr, prefix: u8) -> String {
    let octets = addr.octets();
    let whole_nibbles = (prefix / 4) as usize;
    let mut nibbles = Vec::with_capacity(32);
    for byte in octets.iter() {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    let mut labels: Vec<String> = nibbles[..whole_nibbles]
        .iter()
        .rev()
        .map(|n| format!("{:x}", n))
        .collect();
    labels.push("ip6.arpa".to_string());
    labels.join(".")
}

/// Transport used to reach a server. Ordering matters: `Udp < Tcp < Tls`,
/// higher is preferred when comparing servers of equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
    Tls,
}

impl Protocol {
    pub fn as_scheme(&self) -> &'static str {
        match self {
            Protocol::Udp => "dns+udp",
            Protocol::Tcp => "dns+tcp",
            Protocol::Tls => "dns+tls",
        }
    }

    pub fn from_scheme(s: &str) -> Option<Self> {
        match s {
            "dns+udp" => Some(Protocol::Udp),
            "dns+tcp" => Some(Protocol::Tcp),
            "dns+tls" => Some(Protocol::Tls),
            _ => None,
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Udp
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_scheme())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_dns_ipv4_whole_octet() {
        let net = Network::parse("192.168.1.0/24").unwrap();
        assert_eq!(net.to_reverse_dns(), "1.168.192.in-addr.arpa");
    }

    #[test]
    fn reverse_dns_ipv6_whole_nibble() {
        let net = Network::parse("2001:db8::/32").unwrap();
        assert_eq!(net.to_reverse_dns(), "0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa");
    }

    #[test]
    fn reverse_dns_ipv4_partial_octet_truncates_down() {
        // /25 truncates down to the /24 octet boundary.
        let net = Network::parse("10.0.0.128/25").unwrap();
        assert_eq!(net.to_reverse_dns(), "0.0.10.in-addr.arpa");
    }

    #[test]
    fn invalid_network_rejected() {
        assert!(Network::parse("not-an-ip/24").is_err());
        assert!(Network::parse("10.0.0.0/99").is_err());
    }

    #[test]
    fn protocol_ordering() {
        assert!(Protocol::Udp < Protocol::Tcp);
        assert!(Protocol::Tcp < Protocol::Tls);
    }

    #[test]
    fn effective_port_defaults() {
        let addr = Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        assert_eq!(addr.effective_port(Protocol::Udp), 53);
        assert_eq!(addr.effective_port(Protocol::Tls), 853);
    }
}
