//! Merges CLI flags, environment variables, and a YAML config file into one
//! [`Config`], in that precedence order (CLI > env > file > default).

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::ServerError;
use crate::server::json::RawServer;
use crate::server::{self, Server};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/dnsconfd.conf";
pub const DEFAULT_RESOLV_CONF_PATH: &str = "/etc/resolv.conf";
pub const DEFAULT_CERTIFICATION_AUTHORITY: &str =
    "/etc/pki/dns/extracted/pem/tls-ca-bundle.pem /etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem";
pub const DEFAULT_RESOLVER_OPTIONS: &str = "edns0 trust-ad";

/// Daemon-wide settings, merged once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub stderr_log: bool,
    pub syslog_log: bool,
    pub file_log: Option<PathBuf>,
    pub resolv_conf_path: PathBuf,
    pub listen_address: IpAddr,
    pub prioritize_wire: bool,
    pub resolver_options: String,
    pub dnssec_enabled: bool,
    pub config_file: PathBuf,
    pub certification_authority: String,
    pub static_servers: Vec<Arc<Server>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stderr_log: true,
            syslog_log: false,
            file_log: None,
            resolv_conf_path: PathBuf::from(DEFAULT_RESOLV_CONF_PATH),
            listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            prioritize_wire: true,
            resolver_options: DEFAULT_RESOLVER_OPTIONS.to_string(),
            dnssec_enabled: false,
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            certification_authority: DEFAULT_CERTIFICATION_AUTHORITY.to_string(),
            static_servers: Vec::new(),
        }
    }
}

/// The on-disk YAML shape: top-level keys mirror the CLI flags, plus
/// `static_servers`.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    log_level: Option<String>,
    stderr_log: Option<bool>,
    syslog_log: Option<bool>,
    file_log: Option<PathBuf>,
    resolv_conf_path: Option<PathBuf>,
    listen_address: Option<IpAddr>,
    prioritize_wire: Option<bool>,
    resolver_options: Option<String>,
    dnssec_enabled: Option<bool>,
    certification_authority: Option<String>,
    #[serde(default)]
    static_servers: Vec<RawServer>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid static server in config file: {0}")]
    Server(#[from] ServerError),
    #[error("invalid listen address: {0}")]
    InvalidListenAddress(String),
}

/// CLI flags understood by the daemon itself (not the thin subcommands),
/// mirroring the original `global_options.c` flag set.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    #[arg(long, env = "DNSCONFD_LOG_LEVEL")]
    pub log_level: Option<String>,
    #[arg(long, env = "DNSCONFD_STDERR_LOG", overrides_with = "no_stderr_log")]
    pub stderr_log: bool,
    #[arg(long = "no-stderr-log")]
    pub no_stderr_log: bool,
    #[arg(long, env = "DNSCONFD_SYSLOG_LOG")]
    pub syslog_log: bool,
    #[arg(long, env = "DNSCONFD_FILE_LOG")]
    pub file_log: Option<PathBuf>,
    #[arg(long, env = "DNSCONFD_RESOLV_CONF_PATH")]
    pub resolv_conf_path: Option<PathBuf>,
    #[arg(long, env = "DNSCONFD_LISTEN_ADDRESS")]
    pub listen_address: Option<String>,
    #[arg(long, env = "DNSCONFD_PRIORITIZE_WIRE", overrides_with = "no_prioritize_wire")]
    pub prioritize_wire: bool,
    #[arg(long = "no-prioritize-wire")]
    pub no_prioritize_wire: bool,
    #[arg(long, env = "DNSCONFD_RESOLVER_OPTIONS")]
    pub resolver_options: Option<String>,
    #[arg(long, env = "DNSCONFD_DNSSEC_ENABLED", overrides_with = "no_dnssec_enabled")]
    pub dnssec_enabled: bool,
    #[arg(long = "no-dnssec-enabled")]
    pub no_dnssec_enabled: bool,
    #[arg(long, env = "DNSCONFD_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,
    #[arg(long, env = "DNSCONFD_CERTIFICATION_AUTHORITY")]
    pub certification_authority: Option<String>,
}

/// Loads the effective configuration: defaults, overlaid by the YAML file,
/// overlaid by CLI flags (which already captured matching env vars via
/// `clap`'s `env` attribute, giving CLI/env combined precedence over the
/// file).
pub fn load(args: &ConfigArgs) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    let config_file_path = args
        .config_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        apply_file(&mut config, &config_file_path)?;
    }
    config.config_file = config_file_path;

    apply_args(&mut config, args)?;

    Ok(config)
}

fn apply_file(config: &mut Config, path: &Path) -> Result<(), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: FileConfig = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(v) = file.log_level {
        config.log_level = v;
    }
    if let Some(v) = file.stderr_log {
        config.stderr_log = v;
    }
    if let Some(v) = file.syslog_log {
        config.syslog_log = v;
    }
    if let Some(v) = file.file_log {
        config.file_log = Some(v);
    }
    if let Some(v) = file.resolv_conf_path {
        config.resolv_conf_path = v;
    }
    if let Some(v) = file.listen_address {
        config.listen_address = v;
    }
    if let Some(v) = file.prioritize_wire {
        config.prioritize_wire = v;
    }
    if let Some(v) = file.resolver_options {
        config.resolver_options = v;
    }
    if let Some(v) = file.dnssec_enabled {
        config.dnssec_enabled = v;
    }
    if let Some(v) = file.certification_authority {
        config.certification_authority = v;
    }

    config.static_servers = file
        .static_servers
        .into_iter()
        .map(|raw| server::json::from_raw(raw).map(Arc::new))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(())
}

fn apply_args(config: &mut Config, args: &ConfigArgs) -> Result<(), ConfigError> {
    if let Some(v) = &args.log_level {
        config.log_level = v.clone();
    }
    if args.no_stderr_log {
        config.stderr_log = false;
    } else if args.stderr_log {
        config.stderr_log = true;
    }
    if args.syslog_log {
        config.syslog_log = true;
    }
    if let Some(v) = &args.file_log {
        config.file_log = Some(v.clone());
    }
    if let Some(v) = &args.resolv_conf_path {
        config.resolv_conf_path = v.clone();
    }
    if let Some(v) = &args.listen_address {
        config.listen_address = v
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddress(v.clone()))?;
    }
    if args.no_prioritize_wire {
        config.prioritize_wire = false;
    } else if args.prioritize_wire {
        config.prioritize_wire = true;
    }
    if let Some(v) = &args.resolver_options {
        config.resolver_options = v.clone();
    }
    if args.no_dnssec_enabled {
        config.dnssec_enabled = false;
    } else if args.dnssec_enabled {
        config.dnssec_enabled = true;
    }
    if let Some(v) = &args.certification_authority {
        config.certification_authority = v.clone();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert!(config.stderr_log);
        assert!(!config.syslog_log);
        assert!(config.prioritize_wire);
        assert_eq!(config.resolver_options, "edns0 trust-ad");
    }

    #[test]
    fn yaml_file_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dnsconfd.conf");
        std::fs::write(
            &path,
            "log_level: debug\nstatic_servers:\n  - address: 127.0.0.1\n",
        )
        .unwrap();

        let mut config = Config::default();
        apply_file(&mut config, &path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.static_servers.len(), 1);
    }

    #[test]
    fn cli_flag_overrides_file() {
        let args = ConfigArgs {
            log_level: Some("trace".to_string()),
            ..Default::default()
        };
        let mut config = Config::default();
        config.log_level = "debug".to_string();
        apply_args(&mut config, &args).unwrap();
        assert_eq!(config.log_level, "trace");
    }
}
