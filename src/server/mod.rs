//! The [`Server`] aggregate and its three constructors (URI string, JSON
//! array, structured bus dict).

pub mod json;
pub mod uri;

use std::net::IpAddr;

use crate::error::ServerError;
use crate::net::{Address, Network, Protocol};

/// A single upstream DNS server description.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub address: Address,
    pub priority: i32,
    pub protocol: Protocol,
    pub interface: String,
    pub dnssec: bool,
    pub ca: Option<String>,
    pub name: Option<String>,
    pub routing_domains: Vec<String>,
    pub search_domains: Vec<String>,
    pub networks: Vec<Network>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            address: Address::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0),
            priority: 0,
            protocol: Protocol::Udp,
            interface: String::new(),
            dnssec: true,
            ca: None,
            name: None,
            routing_domains: Vec::new(),
            search_domains: Vec::new(),
            networks: Vec::new(),
        }
    }
}

impl Server {
    /// The sort/tier key used by the routing-table builder and the active-set
    /// selector: `(priority desc, protocol desc, dnssec desc)`.
    pub fn tier_key(&self) -> (i32, Protocol, bool) {
        (self.priority, self.protocol, self.dnssec)
    }

    /// Whether this server is bound to a specific local interface rather than
    /// usable globally.
    pub fn is_interface_scoped(&self) -> bool {
        !self.interface.is_empty()
    }

    /// Applies shared post-construction defaulting used by all three
    /// constructors: default routing domain and protocol-default port.
    fn finalize(mut self) -> Self {
        if self.routing_domains.is_empty() {
            self.routing_domains.push(".".to_string());
        }
        if self.address.port == 0 {
            self.address.port = self.address.effective_port(self.protocol);
        }
        self
    }

    pub fn interface_name_len_ok(interface: &str) -> bool {
        interface.len() <= 15
    }
}

/// `IDN-A`/NFC validation as applied to `routing_domains`/`search_domains`
/// labels. Rejects any domain containing `".."`.
pub fn validate_domain(domain: &str) -> Result<String, ServerError> {
    if domain == "." {
        return Ok(domain.to_string());
    }
    if domain.contains("..") {
        return Err(ServerError::InvalidDomain);
    }
    idna::domain_to_ascii(domain).map_err(|_| ServerError::InvalidDomain)
}

/// Compares two servers the way the resolver's incremental reconciler does:
/// by every field except `routing_domains`/`search_domains`/`networks`,
/// whose changes are handled upstream by the routing-table rebuild.
pub fn servers_equal_for_reconciliation(a: &Server, b: &Server) -> bool {
    a.address == b.address
        && a.priority == b.priority
        && a.interface == b.interface
        && a.dnssec == b.dnssec
        && a.protocol == b.protocol
        && a.ca == b.ca
        && a.name == b.name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_routing_domain_is_root() {
        let server = Server::default().finalize();
        assert_eq!(server.routing_domains, vec!["."]);
    }

    #[test]
    fn validate_domain_rejects_double_dot() {
        assert!(validate_domain("example..com").is_err());
    }

    #[test]
    fn validate_domain_accepts_root() {
        assert_eq!(validate_domain(".").unwrap(), ".");
    }

    #[test]
    fn servers_equal_ignores_domain_lists() {
        let mut a = Server::default().finalize();
        let mut b = a.clone();
        a.routing_domains.push("example.com".to_string());
        b.search_domains.push("other.com".to_string());
        assert!(servers_equal_for_reconciliation(&a, &b));
    }
}
