//! `dnsconfd status`: prints the daemon's `Status` JSON snapshot verbatim.
//! Grounded on `cli_status.c`.

use zbus::Connection;

use crate::error::ExitCode;

use super::manager_proxy::ManagerProxy;

pub async fn run() -> ExitCode {
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
    match proxy.status().await {
        Ok(json) => {
            println!("{json}");
            ExitCode::Ok
        }
        Err(e) => {
            eprintln!("Error calling Status method: {e}");
            ExitCode::CommandFailure
        }
    }
}
