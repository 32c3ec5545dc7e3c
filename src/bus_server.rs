//! Hosts `com.redhat.dnsconfd.Manager`: the `Update`/`Status`/`Reload`
//! methods and the `configuration_serial` property. Parses bus arguments
//! into [`Server`] values and hands them to the FSM as events via a channel;
//! never touches FSM state directly except through that channel.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use zbus::zvariant::{OwnedValue, Value};
use zbus::{interface, Connection, SignalContext};

use crate::active_set::ResolutionMode;
use crate::error::ServerError;
use crate::net::{Network, Protocol};
use crate::server::{validate_domain, Server};

pub const BUS_NAME: &str = "com.redhat.dnsconfd";
pub const OBJECT_PATH: &str = "/com/redhat/dnsconfd";
pub const INTERFACE_NAME: &str = "com.redhat.dnsconfd.Manager";

/// What the bus handler hands to the FSM for an `Update` call.
pub struct UpdateRequest {
    pub servers: Vec<Server>,
    pub mode: ResolutionMode,
    pub reply: oneshot::Sender<u32>,
}

/// A snapshot of FSM state used to answer `Status`.
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub service: &'static str,
    pub mode: String,
    pub state: String,
    pub cache_config: HashMap<String, Vec<String>>,
    pub servers: Vec<serde_json::Value>,
}

/// Messages the bus interface sends to the FSM driver task.
pub enum BusEvent {
    Update(UpdateRequest),
    Reload(oneshot::Sender<()>),
    Status(oneshot::Sender<StatusSnapshot>),
}

pub struct ManagerInterface {
    events: mpsc::Sender<BusEvent>,
    configuration_serial: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

impl ManagerInterface {
    pub fn new(
        events: mpsc::Sender<BusEvent>,
        configuration_serial: std::sync::Arc<std::sync::atomic::AtomicU32>,
    ) -> Self {
        Self {
            events,
            configuration_serial,
        }
    }
}

#[interface(name = "com.redhat.dnsconfd.Manager")]
impl ManagerInterface {
    async fn update(
        &self,
        servers: Vec<HashMap<String, OwnedValue>>,
        mode: u32,
    ) -> (u32, String) {
        let Some(mode) = ResolutionMode::from_u32(mode) else {
            return (0, "Mode is invalid".to_string());
        };

        let mut parsed = Vec::with_capacity(servers.len());
        for dict in servers {
            match parse_server_dict(&dict) {
                Ok(server) => {
                    if !is_duplicate(&parsed, &server) {
                        parsed.push(server);
                    }
                }
                Err(e) => return (0, e.to_string()),
            }
        }

        let (tx, rx) = oneshot::channel();
        if self
            .events
            .send(BusEvent::Update(UpdateRequest {
                servers: parsed,
                mode,
                reply: tx,
            }))
            .await
            .is_err()
        {
            return (0, "Daemon is shutting down".to_string());
        }

        match rx.await {
            Ok(serial) => (serial, "Update accepted".to_string()),
            Err(_) => (0, "Daemon is shutting down".to_string()),
        }
    }

    async fn status(&self) -> String {
        let (tx, rx) = oneshot::channel();
        if self.events.send(BusEvent::Status(tx)).await.is_err() {
            return "{}".to_string();
        }
        match rx.await {
            Ok(snapshot) => serde_json::to_string(&snapshot).unwrap_or_default(),
            Err(_) => "{}".to_string(),
        }
    }

    async fn reload(&self) -> String {
        let (tx, rx) = oneshot::channel();
        if self.events.send(BusEvent::Reload(tx)).await.is_err() {
            return "Daemon is shutting down".to_string();
        }
        let _ = rx.await;
        "Reload accepted".to_string()
    }

    #[zbus(property)]
    async fn configuration_serial(&self) -> u32 {
        self.configuration_serial
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Notifies subscribers that `configuration_serial` advanced.
pub async fn notify_serial_changed(ctx: &SignalContext<'_>) -> zbus::Result<()> {
    ManagerInterface::configuration_serial_changed(ctx).await
}

fn is_duplicate(parsed: &[Server], candidate: &Server) -> bool {
    parsed.iter().any(|existing| {
        existing.address.ip == candidate.address.ip && existing.interface != candidate.interface
    })
}

fn parse_server_dict(dict: &HashMap<String, OwnedValue>) -> Result<Server, ServerError> {
    let address = parse_address_field(dict)?;
    let mut server = Server {
        address,
        ..Server::default()
    };

    if let Some(v) = dict.get("port") {
        let port: i32 = i32::try_from(Value::from(v.clone())).map_err(|_| ServerError::InvalidPort)?;
        if !(0..=65535).contains(&port) {
            return Err(ServerError::InvalidPort);
        }
        server.address.port = port as u16;
    }
    if let Some(v) = dict.get("priority") {
        server.priority =
            i32::try_from(Value::from(v.clone())).map_err(|_| ServerError::InvalidPriority)?;
    }
    if let Some(v) = dict.get("protocol") {
        let s: String = String::try_from(Value::from(v.clone())).unwrap_or_default();
        server.protocol = Protocol::from_scheme(&s).ok_or(ServerError::InvalidProtocol)?;
    }
    if let Some(v) = dict.get("interface") {
        let s: String = String::try_from(Value::from(v.clone())).unwrap_or_default();
        if !Server::interface_name_len_ok(&s) {
            return Err(ServerError::InterfaceTooLong);
        }
        server.interface = s;
    }
    if let Some(v) = dict.get("dnssec") {
        server.dnssec = bool::try_from(Value::from(v.clone())).unwrap_or(true);
    }
    if let Some(v) = dict.get("ca") {
        server.ca = String::try_from(Value::from(v.clone())).ok();
    }
    if let Some(v) = dict.get("name") {
        server.name = String::try_from(Value::from(v.clone())).ok();
    }
    if let Some(v) = dict.get("routing_domains") {
        server.routing_domains = parse_domain_list(v)?;
    }
    if let Some(v) = dict.get("search_domains") {
        server.search_domains = parse_domain_list(v)?;
    }
    if let Some(v) = dict.get("networks") {
        let list: Vec<String> = Vec::try_from(Value::from(v.clone())).unwrap_or_default();
        server.networks = list
            .iter()
            .map(|n| Network::parse(n))
            .collect::<Result<Vec<_>, _>>()?;
    }

    if server.routing_domains.is_empty() {
        server.routing_domains.push(".".to_string());
    }
    if server.address.port == 0 {
        server.address.port = server.address.effective_port(server.protocol);
    }

    Ok(server)
}

fn parse_address_field(dict: &HashMap<String, OwnedValue>) -> Result<crate::net::Address, ServerError> {
    let raw = dict.get("address").ok_or(ServerError::MissingAddress)?;
    let value = Value::from(raw.clone());

    if let Ok(s) = String::try_from(value.clone()) {
        let ip = crate::net::parse_address(&s)?;
        return Ok(crate::net::Address::new(ip, 0));
    }

    if let Ok(bytes) = Vec::<u8>::try_from(value) {
        let ip = match bytes.len() {
            4 => std::net::IpAddr::V4(std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])),
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes);
                std::net::IpAddr::V6(std::net::Ipv6Addr::from(octets))
            }
            _ => return Err(ServerError::InvalidAddress),
        };
        return Ok(crate::net::Address::new(ip, 0));
    }

    Err(ServerError::InvalidAddress)
}

fn parse_domain_list(value: &OwnedValue) -> Result<Vec<String>, ServerError> {
    let list: Vec<String> = Vec::try_from(Value::from(value.clone())).unwrap_or_default();
    list.iter().map(|d| validate_domain(d)).collect()
}

/// Registers the interface on the system bus under the well-known name.
pub async fn serve(
    connection: &Connection,
    interface: ManagerInterface,
) -> zbus::Result<()> {
    connection
        .object_server()
        .at(OBJECT_PATH, interface)
        .await?;
    connection.request_name(BUS_NAME).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Address;
    use std::net::{IpAddr, Ipv4Addr};

    fn server_with_interface(interface: &str) -> Server {
        Server {
            address: Address::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 53),
            interface: interface.to_string(),
            ..Server::default()
        }
    }

    #[test]
    fn duplicate_detection_ignores_same_interface() {
        let parsed = vec![server_with_interface("eth0")];
        let candidate = server_with_interface("eth0");
        assert!(!is_duplicate(&parsed, &candidate));
    }

    #[test]
    fn duplicate_detection_flags_same_address_different_interface() {
        let parsed = vec![server_with_interface("eth0")];
        let candidate = server_with_interface("wlan0");
        assert!(is_duplicate(&parsed, &candidate));
    }
}
