//! Constructs [`Server`] values from JSON (array ingress and the bus dict
//! ingress share this model) and serializes them back for the `Status` call.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::ServerError;
use crate::net::{Address, Network, Protocol};

use super::{validate_domain, Server};

/// The wire/JSON/YAML shape of a server description. Any type mismatch on a
/// present key surfaces as [`ServerError::BadlyFormedJson`] to the caller.
#[derive(Debug, Deserialize, Serialize)]
pub struct RawServer {
    pub address: String,
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub dnssec: Option<DnssecValue>,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub routing_domains: Vec<String>,
    #[serde(default)]
    pub search_domains: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
}

/// `dnssec` accepts bool, int, or string forms on the JSON/bus ingress
/// (unlike the URI ingress, which only recognizes literal `"0"`).
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DnssecValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl DnssecValue {
    fn as_bool(&self) -> bool {
        match self {
            DnssecValue::Bool(b) => *b,
            DnssecValue::Int(i) => *i != 0,
            DnssecValue::Str(s) => s != "0",
        }
    }
}

/// Parses a whole JSON array of server descriptions. Fails as a whole on the
/// first malformed entry — there is no partial result.
pub fn parse_array(text: &str) -> Result<Vec<Server>, ServerError> {
    let raw: Vec<RawServer> =
        serde_json::from_str(text).map_err(|e| ServerError::BadlyFormedJson(e.to_string()))?;
    raw.into_iter().map(from_raw).collect()
}

pub fn from_raw(raw: RawServer) -> Result<Server, ServerError> {
    let ip = IpAddr::from_str(&raw.address).map_err(|_| ServerError::InvalidAddress)?;

    let protocol = match raw.protocol {
        Some(p) => Protocol::from_scheme(&p).ok_or(ServerError::InvalidProtocol)?,
        None => Protocol::Udp,
    };

    let port = match raw.port {
        Some(p) if (0..=65535).contains(&p) => p as u16,
        Some(_) => return Err(ServerError::InvalidPort),
        None => 0,
    };

    let interface = raw.interface.unwrap_or_default();
    if !Server::interface_name_len_ok(&interface) {
        return Err(ServerError::InterfaceTooLong);
    }

    let routing_domains = raw
        .routing_domains
        .iter()
        .map(|d| validate_domain(d))
        .collect::<Result<Vec<_>, _>>()?;
    let search_domains = raw
        .search_domains
        .iter()
        .map(|d| validate_domain(d))
        .collect::<Result<Vec<_>, _>>()?;
    let networks = raw
        .networks
        .iter()
        .map(|n| Network::parse(n))
        .collect::<Result<Vec<_>, _>>()?;

    let server = Server {
        address: Address::new(ip, port),
        priority: raw.priority.unwrap_or(0),
        protocol,
        interface,
        dnssec: raw.dnssec.map(|d| d.as_bool()).unwrap_or(true),
        ca: raw.ca,
        name: raw.name,
        routing_domains,
        search_domains,
        networks,
    };

    Ok(server.finalize())
}

/// Canonical serialization used by the `Status` bus call: `scheme://addr[:port][#name]`.
pub fn to_uri_string(server: &Server) -> String {
    let addr = match server.address.ip {
        IpAddr::V4(_) => server.address.ip.to_string(),
        IpAddr::V6(_) => format!("[{}]", server.address.ip),
    };
    let mut uri = format!("{}://{}", server.protocol.as_scheme(), addr);

    let default_port = server.address.effective_port(server.protocol);
    if server.address.port != default_port && server.address.port != 0 {
        uri.push_str(&format!(":{}", server.address.port));
    }
    if server.protocol == Protocol::Tls {
        if let Some(name) = &server.name {
            uri.push_str(&format!("#{name}"));
        }
    }
    uri
}

/// The full JSON object shape returned for each entry in `Status`'s `servers`
/// array: address, port, name-or-null, routing_domains, search_domains,
/// interface-or-null, protocol string, dnssec bool, networks as `ip/prefix`.
pub fn to_json(server: &Server) -> serde_json::Value {
    serde_json::json!({
        "address": server.address.ip.to_string(),
        "port": server.address.port,
        "name": server.name,
        "routing_domains": server.routing_domains,
        "search_domains": server.search_domains,
        "interface": if server.interface.is_empty() { None } else { Some(server.interface.clone()) },
        "protocol": server.protocol.as_scheme(),
        "dnssec": server.dnssec,
        "networks": server.networks.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_array() {
        let servers = parse_array(r#"[{"address": "127.0.0.1"}]"#).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].address.port, 53);
        assert_eq!(servers[0].routing_domains, vec!["."]);
    }

    #[test]
    fn whole_array_fails_on_one_bad_entry() {
        let text = r#"[{"address": "127.0.0.1"}, {"address": "not-an-ip"}]"#;
        assert!(parse_array(text).is_err());
    }

    #[test]
    fn dnssec_accepts_string_and_int_forms() {
        let servers = parse_array(
            r#"[{"address": "127.0.0.1", "dnssec": "0"}, {"address": "127.0.0.2", "dnssec": 0}]"#,
        )
        .unwrap();
        assert!(!servers[0].dnssec);
        assert!(!servers[1].dnssec);
    }

    #[test]
    fn roundtrip_uri_string() {
        let servers = parse_array(
            r#"[{"address": "127.0.0.1", "protocol": "dns+tls", "name": "example.com"}]"#,
        )
        .unwrap();
        assert_eq!(to_uri_string(&servers[0]), "dns+tls://127.0.0.1#example.com");
    }

    #[test]
    fn bad_port_rejected() {
        let text = r#"[{"address": "127.0.0.1", "port": 99999}]"#;
        assert!(parse_array(text).is_err());
    }
}
