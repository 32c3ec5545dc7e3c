//! Thin subprocess wrapper over `unbound-control`. Argv is always built as a
//! `Vec<String>`, never by string concatenation.

use std::sync::Arc;

use tokio::process::Command;

use crate::server::Server;

const BINARY: &str = "unbound-control";

#[derive(Debug, thiserror::Error)]
pub enum UnboundControlError {
    #[error("failed to spawn {BINARY}: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("{BINARY} {args:?} exited with non-zero status")]
    NonZeroExit { args: Vec<String> },
}

async fn run(args: Vec<String>) -> Result<(), UnboundControlError> {
    let status = Command::new(BINARY)
        .args(&args)
        .status()
        .await
        .map_err(UnboundControlError::Spawn)?;

    if !status.success() {
        return Err(UnboundControlError::NonZeroExit { args });
    }
    Ok(())
}

/// `forward_add [+i][+t] domain addr[@port][#name] ...` followed by
/// `flush_zone domain`. The flags reflect the first server of the active
/// set (the tier guarantees homogeneity across the set).
pub async fn add_domain(domain: &str, servers: &[&Arc<Server>]) -> Result<(), UnboundControlError> {
    let Some(first) = servers.first() else {
        return Ok(());
    };

    let mut args = vec!["forward_add".to_string()];
    let flags = forward_flags(first);
    if !flags.is_empty() {
        args.push(flags);
    }
    args.push(domain.to_string());
    for server in servers {
        args.push(server_arg(server));
    }
    run(args).await?;

    run(vec!["flush_zone".to_string(), domain.to_string()]).await
}

/// `forward_remove [+i] domain` (or, for the root domain, re-adding
/// `127.0.0.1` instead of removing) followed by `flush_zone domain`.
pub async fn remove_domain(domain: &str) -> Result<(), UnboundControlError> {
    if domain == "." {
        run(vec![
            "forward_add".to_string(),
            ".".to_string(),
            "127.0.0.1".to_string(),
        ])
        .await?;
    } else {
        run(vec![
            "forward_remove".to_string(),
            "+i".to_string(),
            domain.to_string(),
        ])
        .await?;
    }

    run(vec!["flush_zone".to_string(), domain.to_string()]).await
}

fn forward_flags(server: &Server) -> String {
    let insecure = !server.dnssec;
    let tls = server.protocol == crate::net::Protocol::Tls;
    match (insecure, tls) {
        (true, true) => "+it".to_string(),
        (true, false) => "+i".to_string(),
        (false, true) => "+t".to_string(),
        (false, false) => String::new(),
    }
}

fn server_arg(server: &Server) -> String {
    let mut arg = format!("{}", server.address.ip);
    let port = server.address.port;
    if server.protocol == crate::net::Protocol::Tls {
        arg.push_str(&format!("@{}", if port != 0 { port } else { 853 }));
        if let Some(name) = &server.name {
            arg.push_str(&format!("#{name}"));
        }
    } else if port != 0 {
        arg.push_str(&format!("@{port}"));
    }
    arg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Address, Protocol};
    use std::net::{IpAddr, Ipv4Addr};

    fn server(dnssec: bool, protocol: Protocol) -> Server {
        Server {
            address: Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 53),
            dnssec,
            protocol,
            ..Server::default()
        }
    }

    #[test]
    fn forward_flags_combine_insecure_and_tls() {
        assert_eq!(forward_flags(&server(false, Protocol::Tls)), "+it");
        assert_eq!(forward_flags(&server(false, Protocol::Udp)), "+i");
        assert_eq!(forward_flags(&server(true, Protocol::Tls)), "+t");
        assert_eq!(forward_flags(&server(true, Protocol::Udp)), "");
    }

    #[test]
    fn server_arg_includes_tls_port_and_name() {
        let mut s = server(true, Protocol::Tls);
        s.name = Some("example.com".to_string());
        assert_eq!(server_arg(&s), "127.0.0.1@853#example.com");
    }
}
