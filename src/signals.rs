//! Signal handling: this daemon is Linux-only (it already depends on
//! `zbus_systemd` and `sd-notify`, both Linux-specific), so there is a single
//! platform module, kept under `signals/` the way the teacher splits
//! per-platform signal code out of its own `signals.rs`.
#[path = "signals/linux.rs"]
mod platform;

pub use platform::Terminate;

use anyhow::Result;

/// The signal listeners the daemon's main loop selects on. SIGINT/SIGTERM are
/// the only signals that drive an FSM transition (`STOP`); reload is
/// delivered over the bus, not SIGHUP.
pub struct Signals {
    pub terminate: Terminate,
}

impl Signals {
    pub fn new() -> Result<Self> {
        Ok(Self {
            terminate: Terminate::new()?,
        })
    }
}
