//! Process exit codes and the top-level error type.
//!
//! Exit codes are sticky: once a non-[`ExitCode::Ok`] code is recorded it is
//! never overwritten by a later one.

use std::process::ExitCode as ProcessExitCode;

/// Matches the daemon's external exit-code contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Ok = 0,
    ServiceFailure = 8,
    DbusFailure = 9,
    ResolvConfFailure = 10,
    ConfigFailure = 11,
    BadArguments = 13,
    Logs = 14,
    CommandFailure = 15,
    UpdateFailure = 16,
    FsmFailure = 17,
}

impl From<ExitCode> for ProcessExitCode {
    fn from(code: ExitCode) -> Self {
        ProcessExitCode::from(code as u8)
    }
}

/// Tracks the first non-[`ExitCode::Ok`] code seen, ignoring every later one.
#[derive(Debug, Default)]
pub struct StickyExitCode {
    code: Option<ExitCode>,
}

impl StickyExitCode {
    pub fn new() -> Self {
        Self { code: None }
    }

    pub fn set(&mut self, code: ExitCode) {
        if self.code.is_none() {
            self.code = Some(code);
        }
    }

    pub fn get(&self) -> ExitCode {
        self.code.unwrap_or(ExitCode::Ok)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server does not have an address set")]
    MissingAddress,
    #[error("address is not a valid IP literal")]
    InvalidAddress,
    #[error("port is not a valid port number")]
    InvalidPort,
    #[error("priority is not a valid integer")]
    InvalidPriority,
    #[error("protocol is not supported")]
    InvalidProtocol,
    #[error("interface name can have at most 15 characters")]
    InterfaceTooLong,
    #[error("network address is invalid")]
    InvalidNetwork,
    #[error("domain name is invalid")]
    InvalidDomain,
    #[error("mode is invalid")]
    InvalidMode,
    #[error("malformed JSON server description: {0}")]
    BadlyFormedJson(String),
    #[error("malformed server URI: {0}")]
    BadlyFormedUri(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FsmError {
    #[error("no transition defined for event {event:?} in state {state:?}")]
    IllegalTransition {
        state: crate::fsm::State,
        event: crate::fsm::Event,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticky_exit_code_keeps_first() {
        let mut code = StickyExitCode::new();
        code.set(ExitCode::ServiceFailure);
        code.set(ExitCode::UpdateFailure);
        assert_eq!(code.get(), ExitCode::ServiceFailure);
    }

    #[test]
    fn sticky_exit_code_defaults_to_ok() {
        let code = StickyExitCode::new();
        assert_eq!(code.get(), ExitCode::Ok);
    }
}
