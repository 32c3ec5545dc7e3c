//! Builds a [`RoutingTable`] — `domain -> ordered server list` — from a flat
//! list of servers, including reverse-DNS entries synthesized from each
//! server's `networks`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::server::Server;

pub type RoutingTable = HashMap<String, Vec<Arc<Server>>>;

/// Builds the routing table. Static servers must be concatenated ahead of
/// dynamic servers by the caller (matching the original daemon's
/// `all_servers` ordering) before calling this.
pub fn build(servers: &[Arc<Server>], config: &Config) -> RoutingTable {
    let mut table: RoutingTable = HashMap::new();

    for server in servers {
        for domain in &server.routing_domains {
            table.entry(domain.clone()).or_default().push(server.clone());
        }
        for network in &server.networks {
            table
                .entry(network.to_reverse_dns())
                .or_default()
                .push(server.clone());
        }
    }

    for list in table.values_mut() {
        sort_tier(list, config.prioritize_wire);
    }

    table
}

/// `(priority desc, protocol desc, dnssec desc)`, with an optional
/// wired-before-wireless tie-break within an already-equal tier. This tie
/// break never changes which tier the active-set selector picks — it only
/// reorders members that are already equal by the primary key.
fn sort_tier(servers: &mut [Arc<Server>], prioritize_wire: bool) {
    servers.sort_by(|a, b| {
        b.tier_key().cmp(&a.tier_key()).then_with(|| {
            if prioritize_wire {
                is_wireless(&a.interface).cmp(&is_wireless(&b.interface))
            } else {
                std::cmp::Ordering::Equal
            }
        })
    });
}

/// Heuristic only: matches Linux predictable network interface names
/// (`wlan0`, `wlp2s0`, ...). Never queries the kernel for link type.
fn is_wireless(interface: &str) -> bool {
    interface.starts_with("wl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Address, Protocol};
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
    fn groups_by_routing_domain() {
        let servers = vec![server(0, "")];
        let config = Config::default();
        let table = build(&servers, &config);
        assert!(table.contains_key("."));
    }

    #[test]
    fn sorts_by_priority_descending() {
        let servers = vec![server(1, ""), server(5, ""), server(3, "")];
        let config = Config::default();
        let table = build(&servers, &config);
        let list = &table["."];
        assert_eq!(list[0].priority, 5);
        assert_eq!(list[1].priority, 3);
        assert_eq!(list[2].priority, 1);
    }

    #[test]
    fn prioritize_wire_breaks_ties_within_tier_only() {
        let servers = vec![server(1, "wlan0"), server(1, "eth0")];
        let mut config = Config::default();
        config.prioritize_wire = true;
        let table = build(&servers, &config);
        let list = &table["."];
        assert_eq!(list[0].interface, "eth0");
        assert_eq!(list[1].interface, "wlan0");
    }

    #[test]
    fn network_synthesizes_reverse_dns_domain() {
        let mut s = server(0, "");
        Arc::get_mut(&mut s).unwrap().networks.push(
            crate::net::Network::parse("192.168.1.0/24").unwrap(),
        );
        let config = Config::default();
        let table = build(&[s], &config);
        assert!(table.contains_key("1.168.192.in-addr.arpa"));
    }
}
