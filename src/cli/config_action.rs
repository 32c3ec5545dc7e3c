//! `dnsconfd config --enable|--disable`: in the original daemon this writes
//! `/etc/NetworkManager/conf.d/dnsconfd.conf`, reloads NetworkManager, and
//! adjusts the ownership of the resolv.conf stub (see `cli_config.c`). Host
//! installation actions are out of scope here, so this subcommand is kept
//! present for CLI parity but performs no host mutation.

use crate::error::ExitCode;

pub fn run(enable: bool) -> ExitCode {
    if enable {
        eprintln!(
            "config --enable is not supported by this build: host installation actions \
             (NetworkManager config snippets, resolv.conf ownership) are out of scope"
        );
    } else {
        eprintln!(
            "config --disable is not supported by this build: host installation actions \
             are out of scope"
        );
    }
    ExitCode::CommandFailure
}
