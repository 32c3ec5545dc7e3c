//! Writes the full resolver configuration file and the stub resolv.conf
//! file, atomically, and keeps an in-memory backup of the stub file's
//! previous contents for rollback.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use atomicwrites::{AtomicFile, OverwriteBehavior};

use crate::active_set::{self, ResolutionMode};
use crate::config::Config;
use crate::net::Protocol;
use crate::routing_table::RoutingTable;
use crate::server::Server;

pub const RESOLVER_CONFIG_PATH: &str = "/run/dnsconfd/unbound.conf";

#[derive(Debug, thiserror::Error)]
pub enum ResolverConfigError {
    #[error("failed to determine effective CA")]
    NoEffectiveCa,
    #[error("failed to write resolver configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Picks the single TLS trust bundle path the resolver should use: the
/// highest-priority TLS server with a non-empty `ca` (subject to the same
/// interface-mode suppression as the active-set selector), falling back to
/// the first readable (or else last) path in the configured fallback list.
pub fn effective_ca(table: &RoutingTable, mode: ResolutionMode, config: &Config) -> Option<String> {
    let mut best: Option<(i32, &str)> = None;

    for (domain, servers) in table {
        for server in active_set::select(servers, mode, domain) {
            if server.protocol != Protocol::Tls {
                continue;
            }
            let Some(ca) = &server.ca else { continue };
            if best.is_none_or(|(prio, _)| server.priority > prio) {
                best = Some((server.priority, ca.as_str()));
            }
        }
    }

    if let Some((_, ca)) = best {
        return Some(ca.to_string());
    }

    effective_ca_from_config(config)
}

fn effective_ca_from_config(config: &Config) -> Option<String> {
    let mut last = None;
    for candidate in config.certification_authority.split_whitespace() {
        last = Some(candidate.to_string());
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
    }
    last
}

/// Writes the full Unbound-compatible configuration file.
pub fn write_resolver_config(
    path: &Path,
    table: &RoutingTable,
    mode: ResolutionMode,
    config: &Config,
) -> Result<String, ResolverConfigError> {
    let mut out = String::new();

    out.push_str("server:\n");
    out.push_str(&format!(
        "\tmodule-config: \"{}\"\n",
        if config.dnssec_enabled {
            "ipsecmod validator iterator"
        } else {
            "ipsecmod iterator"
        }
    ));
    out.push_str(&format!("\tinterface: {}\n", config.listen_address));
    out.push_str("\tdo-not-query-address: 127.0.0.1/8\n");

    let ca = effective_ca(table, mode, config).ok_or(ResolverConfigError::NoEffectiveCa)?;
    out.push_str(&format!("\ttls-cert-bundle: {ca}\n"));

    let mut root_present = false;
    let mut domains: Vec<&String> = table.keys().collect();
    domains.sort();
    for domain in domains {
        let servers = &table[domain];
        let active = active_set::select(servers, mode, domain);
        if active.is_empty() {
            continue;
        }
        if domain == "." {
            root_present = true;
        }
        out.push_str(&format!("forward-zone:\n\tname: \"{domain}\"\n"));
        let mut any_tls = false;
        for server in &active {
            if server.protocol == Protocol::Tls {
                any_tls = true;
            }
            out.push_str(&format!("\tforward-addr: {}\n", forward_addr(server)));
        }
        out.push_str(&format!(
            "\tforward-tls-upstream: {}\n",
            if any_tls { "yes" } else { "no" }
        ));
    }

    if !root_present {
        out.push_str("forward-zone:\n\tname: \".\"\n\tforward-addr: \"127.0.0.1\"\n");
    }

    atomic_write(path, &out)?;
    Ok(ca)
}

fn forward_addr(server: &Server) -> String {
    let mut s = format!("{}", server.address.ip);
    let port = server.address.port;
    if server.protocol == Protocol::Tls {
        s.push_str(&format!("@{}", if port != 0 { port } else { 853 }));
        if let Some(name) = &server.name {
            s.push_str(&format!("#{name}"));
        }
    } else if port != 0 {
        s.push_str(&format!("@{port}"));
    }
    s
}

/// Tracks the stub resolv.conf's original contents so they can be restored.
#[derive(Debug, Default)]
pub struct ResolvConfBackup {
    original: Option<String>,
}

impl ResolvConfBackup {
    pub fn new() -> Self {
        Self::default()
    }

    fn capture_if_needed(&mut self, path: &Path) -> std::io::Result<()> {
        if self.original.is_none() {
            self.original = Some(std::fs::read_to_string(path).unwrap_or_default());
        }
        Ok(())
    }

    /// Restores the original resolv.conf contents, if a backup was taken.
    pub fn restore(&self, path: &Path) -> std::io::Result<()> {
        if let Some(original) = &self.original {
            atomic_write(path, original)?;
        }
        Ok(())
    }
}

/// Writes the stub resolver file: search-domain union, options line, and the
/// listen address as the sole nameserver.
pub fn write_resolv_conf(
    path: &Path,
    table: &RoutingTable,
    mode: ResolutionMode,
    config: &Config,
    backup: &mut ResolvConfBackup,
) -> std::io::Result<()> {
    backup.capture_if_needed(path)?;

    let mut out = String::new();
    out.push_str("# Generated by dnsconfd\n");

    let mut seen = HashSet::new();
    let mut search_line = String::new();
    let mut domains: Vec<&String> = table.keys().collect();
    domains.sort();
    for domain in domains {
        let servers = &table[domain];
        for server in active_set::select(servers, mode, domain) {
            for search in &server.search_domains {
                if seen.insert(search.clone()) {
                    if !search_line.is_empty() {
                        search_line.push(' ');
                    }
                    search_line.push_str(search);
                }
            }
        }
    }
    if !search_line.is_empty() {
        out.push_str(&format!("search {search_line}\n"));
    }

    if !config.resolver_options.is_empty() {
        out.push_str(&format!("options {}\n", config.resolver_options));
    }

    out.push_str(&format!("nameserver {}\n", config.listen_address));

    atomic_write(path, &out)
}

/// Write-temp-then-rename so a crash mid-write never leaves a half-written
/// file in place.
fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = AtomicFile::new(path, OverwriteBehavior::AllowOverwrite);
    file.write(|f| f.write_all(contents.as_bytes()))
        .map_err(|err| match err {
            atomicwrites::Error::Internal(e) => e,
            atomicwrites::Error::User(e) => e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Address;
    use std::net::{IpAddr, Ipv4Addr};

    fn table_with(server: Server) -> RoutingTable {
        let mut table = RoutingTable::new();
        table.insert(".".to_string(), vec![Arc::new(server)]);
        table
    }

    #[test]
    fn falls_back_to_config_ca_when_no_tls_server_present() {
        let table = table_with(Server {
            address: Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 53),
            routing_domains: vec![".".to_string()],
            ..Server::default()
        });
        let config = Config::default();
        let ca = effective_ca(&table, ResolutionMode::Backup, &config);
        assert_eq!(ca, Some(config.certification_authority.split_whitespace().last().unwrap().to_string()));
    }

    #[test]
    fn write_resolver_config_includes_synthetic_root_zone_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unbound.conf");
        let table = RoutingTable::new();
        let config = Config::default();
        write_resolver_config(&path, &table, ResolutionMode::Backup, &config).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("forward-addr: \"127.0.0.1\""));
    }

    #[test]
    fn write_resolv_conf_backup_restores_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolv.conf");
        std::fs::write(&path, "# original\nnameserver 8.8.8.8\n").unwrap();

        let table = RoutingTable::new();
        let config = Config::default();
        let mut backup = ResolvConfBackup::new();
        write_resolv_conf(&path, &table, ResolutionMode::Backup, &config, &mut backup).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("nameserver 127.0.0.1"));

        backup.restore(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# original\nnameserver 8.8.8.8\n");
    }
}
