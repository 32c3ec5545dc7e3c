//! The `dnsconfd` command-line front-end: when invoked with a subcommand it
//! acts as a thin client of the daemon's own bus interface; invoked bare it
//! falls through to `main` running the daemon itself.

pub mod manager_proxy;
mod config_action;
mod reload;
mod status;
mod update;

use clap::{Parser, Subcommand};

use crate::config::ConfigArgs;
use crate::error::ExitCode;

#[derive(Parser)]
#[command(name = "dnsconfd", author, version, about = "DNS cache configuration daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the daemon's current status as JSON.
    Status,
    /// Ask the daemon to reload its configuration and restart the resolver.
    Reload,
    /// Replace the dynamic server set with the given server URIs.
    Update {
        servers: Vec<String>,
        #[arg(long, default_value_t = 1)]
        mode: u32,
    },
    /// Install or remove host integration (out of scope in this build).
    Config {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
}

pub async fn dispatch(command: Command) -> ExitCode {
    match command {
        Command::Status => status::run().await,
        Command::Reload => reload::run().await,
        Command::Update { servers, mode } => update::run(servers, mode).await,
        Command::Config { enable, .. } => config_action::run(enable),
    }
}
