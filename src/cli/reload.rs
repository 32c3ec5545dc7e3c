//! `dnsconfd reload`: asks the daemon to re-read its configuration and
//! restart the resolver. Grounded on `cli_reload.c`.

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
    match proxy.reload().await {
        Ok(message) => {
            println!("{message}");
            ExitCode::Ok
        }
        Err(e) => {
            eprintln!("Error calling Reload method: {e}");
            ExitCode::CommandFailure
        }
    }
}
