//! `dnsconfd update <server-uri>...`: parses server URIs, calls `Update`,
//! then waits (up to 5s) for `configuration_serial` to reach the returned
//! serial. Grounded on `cli_update.c`'s `wait_for_serial`.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use zbus::zvariant::{OwnedValue, Value};
use zbus::Connection;

use crate::active_set::ResolutionMode;
use crate::error::ExitCode;
use crate::server::Server;

use super::manager_proxy::ManagerProxy;

pub async fn run(server_uris: Vec<String>, mode: u32) -> ExitCode {
    let Some(mode) = ResolutionMode::from_u32(mode) else {
        eprintln!("Mode is invalid");
        return ExitCode::BadArguments;
    };

    let mut servers = Vec::with_capacity(server_uris.len());
    for uri in &server_uris {
        match crate::server::uri::parse(uri) {
            Ok(server) => servers.push(server),
            Err(e) => {
                eprintln!("Error parsing server URI {uri}: {e}");
                return ExitCode::BadArguments;
            }
        }
    }

    let connection = match Connection::system().await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error connecting to system bus: {e}");
            return ExitCode::CommandFailure;
        }
    };
    let proxy = match ManagerProxy::new(&connection).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error connecting to system bus: {e}");
            return ExitCode::CommandFailure;
        }
    };

    let mut serial_changes = match proxy.receive_configuration_serial_changed().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error subscribing to configuration_serial: {e}");
            return ExitCode::CommandFailure;
        }
    };

    let dicts: Vec<HashMap<String, OwnedValue>> = servers.iter().map(server_to_dict).collect();
    let (serial, message) = match proxy.update(dicts, mode as u32).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error calling Update method: {e}");
            return ExitCode::CommandFailure;
        }
    };

    println!("{message} (Serial: {serial})");
    if serial == 0 {
        return ExitCode::CommandFailure;
    }

    if proxy.configuration_serial().await.unwrap_or(0) == serial {
        return ExitCode::Ok;
    }

    let wait = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(change) = serial_changes.next().await {
            if change.get().await.unwrap_or(0) == serial {
                return;
            }
        }
    })
    .await;

    if wait.is_err() {
        eprintln!("Timeout waiting for configuration update");
        return ExitCode::CommandFailure;
    }

    ExitCode::Ok
}

/// Mirrors `cli_update.c`'s `build_servers_variant`: only present/non-default
/// fields are added to the dict, letting the daemon apply its own defaults.
fn server_to_dict(server: &Server) -> HashMap<String, OwnedValue> {
    let mut dict = HashMap::new();
    dict.insert("address".to_string(), owned(server.address.ip.to_string()));
    if server.address.port != 0 {
        dict.insert("port".to_string(), owned(server.address.port as i32));
    }
    dict.insert("priority".to_string(), owned(server.priority));
    dict.insert(
        "protocol".to_string(),
        owned(server.protocol.as_scheme().to_string()),
    );
    if !server.interface.is_empty() {
        dict.insert("interface".to_string(), owned(server.interface.clone()));
    }
    dict.insert("dnssec".to_string(), owned(server.dnssec));
    if let Some(ca) = &server.ca {
        dict.insert("ca".to_string(), owned(ca.clone()));
    }
    if let Some(name) = &server.name {
        dict.insert("name".to_string(), owned(name.clone()));
    }
    if !server.routing_domains.is_empty() {
        dict.insert(
            "routing_domains".to_string(),
            owned(server.routing_domains.clone()),
        );
    }
    if !server.search_domains.is_empty() {
        dict.insert(
            "search_domains".to_string(),
            owned(server.search_domains.clone()),
        );
    }
    if !server.networks.is_empty() {
        let networks: Vec<String> = server.networks.iter().map(|n| n.to_string()).collect();
        dict.insert("networks".to_string(), owned(networks));
    }
    dict
}

/// Conversion to `OwnedValue` only fails for file-descriptor variants, which
/// never occur for the primitive types built here.
fn owned<'a, T: Into<Value<'a>>>(value: T) -> OwnedValue {
    OwnedValue::try_from(value.into()).expect("primitive dbus value conversion is infallible")
}
