//! Constructs a [`Server`] from the `scheme://host[:port][?k=v&...]` URI form.

use std::net::IpAddr;
use std::str::FromStr;

use crate::error::ServerError;
use crate::net::{Address, Network, Protocol};

use super::{validate_domain, Server};

/// Parses a single server URI string.
///
/// Scheme must be one of `dns+udp`, `dns+tcp`, `dns+tls`. `host` must be an
/// IP literal (IPv6 addresses in brackets, per URI rules; the brackets are
/// stripped before storage). Unknown query keys are silently ignored.
pub fn parse(s: &str) -> Result<Server, ServerError> {
    let (scheme, rest) = s
        .split_once("://")
        .ok_or_else(|| ServerError::BadlyFormedUri(s.to_string()))?;
    let protocol =
        Protocol::from_scheme(scheme).ok_or_else(|| ServerError::BadlyFormedUri(s.to_string()))?;

    let (authority, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };

    let (host, port) = split_authority(authority)?;
    let ip = IpAddr::from_str(&host).map_err(|_| ServerError::InvalidAddress)?;

    let mut server = Server {
        address: Address::new(ip, port),
        protocol,
        ..Server::default()
    };

    if let Some(query) = query {
        apply_query(&mut server, query)?;
    }

    Ok(server.finalize())
}

fn split_authority(authority: &str) -> Result<(String, u16), ServerError> {
    if let Some(stripped) = authority.strip_prefix('[') {
        let (host, rest) = stripped
            .split_once(']')
            .ok_or_else(|| ServerError::BadlyFormedUri(authority.to_string()))?;
        let port = match rest.strip_prefix(':') {
            Some(p) => p.parse().map_err(|_| ServerError::InvalidPort)?,
            None => 0,
        };
        return Ok((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        // Only treat the ':' as a port separator when the host part parses as
        // IPv4; otherwise it's a colon inside a bare (unbracketed) IPv6 literal.
        Some((host, port_str)) if IpAddr::from_str(host).is_ok() => {
            let port = port_str.parse().map_err(|_| ServerError::InvalidPort)?;
            Ok((host.to_string(), port))
        }
        _ => Ok((authority.to_string(), 0)),
    }
}

fn apply_query(server: &mut Server, query: &str) -> Result<(), ServerError> {
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = percent_decode(value);
        match key {
            "priority" => {
                server.priority = value.parse().map_err(|_| {
                    ServerError::BadlyFormedUri(format!("invalid priority {value}"))
                })?;
            }
            "domain" => server
                .routing_domains
                .push(validate_domain(&value)?),
            "search" => server.search_domains.push(validate_domain(&value)?),
            "interface" => {
                if !Server::interface_name_len_ok(&value) {
                    return Err(ServerError::InterfaceTooLong);
                }
                server.interface = value;
            }
            // Only a literal "0" clears the advisory dnssec flag; every other
            // value (including other falsey-looking strings) leaves it true.
            "dnssec" => server.dnssec = value != "0",
            "ca" => server.ca = Some(value),
            "name" => server.name = Some(value),
            "network" => server
                .networks
                .push(Network::parse(&value).map_err(|_| ServerError::InvalidNetwork)?),
            _ => {}
        }
    }
    Ok(())
}

fn percent_decode(value: &str) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hi = chars.next();
            let lo = chars.next();
            if let (Some(hi), Some(lo)) = (hi, lo) {
                if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                    out.push(byte);
                    continue;
                }
            }
            out.push(b'%');
        } else {
            out.extend_from_slice(c.to_string().as_bytes());
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_udp_uri() {
        let server = parse("dns+udp://192.168.1.1").unwrap();
        assert_eq!(server.address.port, 53);
        assert_eq!(server.protocol, Protocol::Udp);
        assert_eq!(server.routing_domains, vec!["."]);
    }

    #[test]
    fn parses_tls_uri_with_port_and_name() {
        let server = parse("dns+tls://2001:db8::1?name=example.com&priority=10").unwrap();
        assert_eq!(server.address.port, 853);
        assert_eq!(server.name.as_deref(), Some("example.com"));
        assert_eq!(server.priority, 10);
    }

    #[test]
    fn bracketed_ipv6_with_explicit_port() {
        let server = parse("dns+udp://[2001:db8::1]:5353").unwrap();
        assert_eq!(server.address.port, 5353);
    }

    #[test]
    fn dnssec_false_only_on_literal_zero() {
        let a = parse("dns+udp://127.0.0.1?dnssec=0").unwrap();
        assert!(!a.dnssec);
        let b = parse("dns+udp://127.0.0.1?dnssec=no").unwrap();
        assert!(b.dnssec);
    }

    #[test]
    fn repeatable_domain_and_search_params() {
        let server = parse("dns+udp://127.0.0.1?domain=a.com&domain=b.com&search=c.com").unwrap();
        assert_eq!(server.routing_domains, vec!["a.com", "b.com"]);
        assert_eq!(server.search_domains, vec!["c.com"]);
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse("https://127.0.0.1").is_err());
    }

    #[test]
    fn interface_too_long_rejected() {
        assert!(parse("dns+udp://127.0.0.1?interface=a_very_long_interface_name").is_err());
    }
}
