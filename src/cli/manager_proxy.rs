//! The client-side mirror of [`crate::bus_server::ManagerInterface`]: every
//! subcommand talks to the running daemon through this proxy instead of
//! building `zbus::Proxy` calls by hand.

use std::collections::HashMap;

use zbus::proxy;
use zbus::zvariant::OwnedValue;

#[proxy(
    interface = "com.redhat.dnsconfd.Manager",
    default_service = "com.redhat.dnsconfd",
    default_path = "/com/redhat/dnsconfd"
)]
pub trait Manager {
    async fn update(
        &self,
        servers: Vec<HashMap<String, OwnedValue>>,
        mode: u32,
    ) -> zbus::Result<(u32, String)>;

    async fn status(&self) -> zbus::Result<String>;

    async fn reload(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn configuration_serial(&self) -> zbus::Result<u32>;
}
