//! Diffs the previously-installed per-domain active-set map against the
//! newly-computed one and issues incremental `unbound-control` commands, or
//! signals that a full reload is required when the effective CA changed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::active_set::{self, ResolutionMode};
use crate::config::Config;
use crate::resolver_config;
use crate::routing_table::RoutingTable;
use crate::server::{servers_equal_for_reconciliation, Server};
use crate::unbound_control::{self, UnboundControlError};

/// The installed state: what unbound-control currently has configured, per
/// domain.
pub type InstalledMap = HashMap<String, Vec<Arc<Server>>>;

#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Incremental reconciliation succeeded; carries the new installed map.
    Reconciled(InstalledMap),
    /// The effective CA changed; caller must do a full config rewrite and
    /// resolver restart instead of incremental work.
    ReloadRequired,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to determine effective CA")]
    NoEffectiveCa,
    #[error(transparent)]
    UnboundControl(#[from] UnboundControlError),
}

/// Known limitation, preserved from the original daemon: this comparator
/// considers two domains' server lists equal even if two equal-tier servers
/// swapped relative order, so the resolver's internal ordering may still
/// change without being detected here.
fn lists_equal(a: &[Arc<Server>], b: &[Arc<Server>]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| servers_equal_for_reconciliation(x, y))
}

pub async fn reconcile(
    table: &RoutingTable,
    mode: ResolutionMode,
    config: &Config,
    installed: &InstalledMap,
    current_effective_ca: &str,
) -> Result<ReconcileOutcome, ReconcileError> {
    let new_ca = resolver_config::effective_ca(table, mode, config)
        .ok_or(ReconcileError::NoEffectiveCa)?;
    if new_ca != current_effective_ca {
        return Ok(ReconcileOutcome::ReloadRequired);
    }

    let mut new_installed: InstalledMap = HashMap::new();
    let mut domains: Vec<&String> = table.keys().collect();
    domains.sort();

    for domain in &domains {
        let servers = &table[*domain];
        let active: Vec<Arc<Server>> = active_set::select(servers, mode, domain)
            .into_iter()
            .cloned()
            .collect();
        if active.is_empty() {
            continue;
        }

        let unchanged = installed
            .get(*domain)
            .map(|old| lists_equal(old, &active))
            .unwrap_or(false);

        if !unchanged {
            let refs: Vec<&Arc<Server>> = active.iter().collect();
            unbound_control::add_domain(domain, &refs).await?;
        }

        new_installed.insert((*domain).clone(), active);
    }

    for domain in installed.keys() {
        if !new_installed.contains_key(domain) {
            unbound_control::remove_domain(domain).await?;
        }
    }

    Ok(ReconcileOutcome::Reconciled(new_installed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Address;
    use std::net::{IpAddr, Ipv4Addr};

    fn server(priority: i32) -> Arc<Server> {
        Arc::new(Server {
            address: Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 53),
            priority,
            routing_domains: vec![".".to_string()],
            ..Server::default()
        })
    }

    #[test]
    fn lists_equal_ignores_domain_lists() {
        let mut a = (*server(0)).clone();
        let mut b = a.clone();
        a.routing_domains.push("x.com".to_string());
        b.search_domains.push("y.com".to_string());
        assert!(lists_equal(&[Arc::new(a)], &[Arc::new(b)]));
    }

    #[test]
    fn lists_equal_false_on_different_length() {
        assert!(!lists_equal(&[server(0)], &[server(0), server(1)]));
    }
}
