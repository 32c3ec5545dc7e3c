mod active_set;
mod bus_server;
mod cli;
mod config;
mod error;
mod fsm;
mod logging;
mod net;
mod reconciler;
mod resolver_config;
mod routing_table;
mod server;
mod service_manager;
mod signals;
mod unbound_control;

use std::process::ExitCode as ProcessExitCode;

use clap::Parser;

use crate::cli::Cli;
use crate::error::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ProcessExitCode {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        if let Err(e) = logging::init_cli_only() {
            eprintln!("failed to initialize logging: {e}");
        }
        return cli::dispatch(command).await.into();
    }

    let config = match config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::ConfigFailure.into();
        }
    };

    if let Err(e) = logging::init(&config) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::Logs.into();
    }

    fsm::run(config).await.into()
}
