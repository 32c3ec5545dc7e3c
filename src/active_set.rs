//! Picks, for one domain, which of its (already sorted) servers are actually
//! installed into the resolver.

use std::sync::Arc;

use crate::server::Server;

/// Resolution mode, controlling how interface-scoped servers are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    Backup = 0,
    Prefer = 1,
    Exclusive = 2,
}

impl ResolutionMode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(ResolutionMode::Backup),
            1 => Some(ResolutionMode::Prefer),
            2 => Some(ResolutionMode::Exclusive),
            _ => None,
        }
    }
}

/// Selects the active set for one domain: walk the head of the sorted list
/// while the tier key stays the same, then drop interface-scoped entries
/// that the current mode forbids for this domain.
pub fn select<'a>(
    servers: &'a [Arc<Server>],
    mode: ResolutionMode,
    domain: &str,
) -> Vec<&'a Arc<Server>> {
    let Some(first) = servers.first() else {
        return Vec::new();
    };
    let tier_key = first.tier_key();

    servers
        .iter()
        .take_while(|s| s.tier_key() == tier_key)
        .filter(|s| !suppressed(s, mode, domain))
        .collect()
}

fn suppressed(server: &Server, mode: ResolutionMode, domain: &str) -> bool {
    if !server.is_interface_scoped() {
        return false;
    }
    match mode {
        ResolutionMode::Exclusive => true,
        ResolutionMode::Prefer => domain == ".",
        ResolutionMode::Backup => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Address;
    use std::net::{IpAddr, Ipv4Addr};

    fn server(priority: i32, interface: &str) -> Arc<Server> {
        Arc::new(Server {
            address: Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 53),
            priority,
            interface: interface.to_string(),
            routing_domains: vec![".".to_string()],
            ..Server::default()
        })
    }

    #[test]
    fn stops_at_first_differing_tier() {
        let servers = vec![server(5, ""), server(5, ""), server(1, "")];
        let active = select(&servers, ResolutionMode::Backup, ".");
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn exclusive_mode_drops_interface_scoped_everywhere() {
        let servers = vec![server(5, "eth0")];
        assert!(select(&servers, ResolutionMode::Exclusive, ".").is_empty());
        assert!(select(&servers, ResolutionMode::Exclusive, "example.com").is_empty());
    }

    #[test]
    fn prefer_mode_drops_interface_scoped_only_at_root() {
        let servers = vec![server(5, "eth0")];
        assert!(select(&servers, ResolutionMode::Prefer, ".").is_empty());
        assert_eq!(select(&servers, ResolutionMode::Prefer, "example.com").len(), 1);
    }

    #[test]
    fn backup_mode_always_keeps_interface_scoped() {
        let servers = vec![server(5, "eth0")];
        assert_eq!(select(&servers, ResolutionMode::Backup, ".").len(), 1);
    }

    #[test]
    fn empty_list_yields_empty_active_set() {
        let servers: Vec<Arc<Server>> = Vec::new();
        assert!(select(&servers, ResolutionMode::Backup, ".").is_empty());
    }
}
