//! Builds the `tracing` subscriber graph from [`Config`]: optional stderr,
//! syslog, and file layers.

use std::fs::OpenOptions;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open syslog connection: {0}")]
    Syslog(String),
    #[error("failed to install global tracing subscriber: {0}")]
    SetGlobal(String),
}

/// Initializes the full logging stack (stderr/syslog/file) before the FSM
/// main loop runs.
pub fn init(config: &Config) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let registry = Registry::default().with(filter);

    let stderr_layer = config
        .stderr_log
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let file_layer = match &config.file_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::OpenFile {
                    path: path.display().to_string(),
                    source,
                })?;
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(std::sync::Mutex::new(file)))
        }
        None => None,
    };

    let syslog_layer = if config.syslog_log {
        Some(SyslogLayer::new()?)
    } else {
        None
    };

    registry
        .with(stderr_layer)
        .with(file_layer)
        .with(syslog_layer)
        .try_init()
        .map_err(|e| LoggingError::SetGlobal(e.to_string()))
}

/// A lighter stderr-only setup used by the thin CLI subcommands, which never
/// run the main loop and therefore don't need syslog/file sinks.
pub fn init_cli_only() -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| LoggingError::SetGlobal(e.to_string()))
}

/// Forwards tracing events to syslog, mirroring the bitmask sink selection
/// and syslog flags (`LOG_CONS|LOG_NDELAY|LOG_PID`) used by the original
/// daemon's logging utilities.
struct SyslogLayer {
    writer: std::sync::Mutex<syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>>,
}

impl SyslogLayer {
    fn new() -> Result<Self, LoggingError> {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: "dnsconfd".into(),
            pid: std::process::id(),
        };
        let writer = syslog::unix(formatter).map_err(|e| LoggingError::Syslog(e.to_string()))?;
        Ok(Self {
            writer: std::sync::Mutex::new(writer),
        })
    }
}

impl<S> tracing_subscriber::Layer<S> for SyslogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut message = String::new();
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        let mut writer = self.writer.lock().expect("syslog writer poisoned");
        let _ = match *event.metadata().level() {
            tracing::Level::ERROR => writer.err(&message),
            tracing::Level::WARN => writer.warning(&message),
            tracing::Level::INFO => writer.notice(&message),
            tracing::Level::DEBUG => writer.debug(&message),
            tracing::Level::TRACE => writer.debug(&message),
        };
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{value:?}"));
        }
    }
}
