//! Runtime configuration for the daemon and the policy evaluator.
//!
//! The CLI fills these in from flags and environment variables; tests and
//! embedding resolvers build them directly.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_SOCKET_PATH: &str = "/run/dns-filter/dns_filter.sock";
pub const DEFAULT_FILTERS_DIR: &str = "/etc/dns-filter/filters";
pub const DEFAULT_PID_FILE: &str = "/run/dns-filter/dns-filter.pid";
pub const DEFAULT_BLOCK_SUFFIX: &str = ".blacklist";
pub const DEFAULT_ALLOW_SUFFIX: &str = ".whitelist";

/// Configuration for the filter server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the listening Unix socket.
    pub socket_path: PathBuf,
    /// Directory holding the list files.
    pub filters_dir: PathBuf,
    /// File name suffix of blocklist files.
    pub block_suffix: String,
    /// File name suffix of allowlist files.
    pub allow_suffix: String,
    /// Permission bits applied to the socket.
    pub socket_mode: u32,
    /// Account the socket is handed to (the resolver's user).
    pub owner: Option<String>,
    pub group: Option<String>,
    /// Deadline for reading a request and writing its response.
    pub connection_timeout: Duration,
    /// How often traffic counters are logged; zero turns this off.
    pub stats_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            filters_dir: PathBuf::from(DEFAULT_FILTERS_DIR),
            block_suffix: DEFAULT_BLOCK_SUFFIX.to_string(),
            allow_suffix: DEFAULT_ALLOW_SUFFIX.to_string(),
            socket_mode: 0o660,
            owner: None,
            group: None,
            connection_timeout: Duration::from_secs(1),
            stats_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration for the resolver-side policy evaluator.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub socket_path: PathBuf,
    /// Address returned for blocked names.
    pub sinkhole: IpAddr,
    /// Round-trip deadline per query; a timeout means fail-open.
    pub timeout: Duration,
    /// Availability probe attempts at startup.
    pub probe_attempts: u32,
    pub probe_interval: Duration,
    /// Re-check an unavailable socket at most this often.
    /// `None` keeps the startup verdict for the process lifetime.
    pub reprobe_interval: Option<Duration>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            sinkhole: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            timeout: Duration::from_millis(50),
            probe_attempts: 4,
            probe_interval: Duration::from_millis(250),
            reprobe_interval: Some(Duration::from_secs(30)),
        }
    }
}

/// Parse an octal permission string such as `660` or `0o600`.
pub fn parse_mode(raw: &str) -> Result<u32, ConfigError> {
    let digits = raw.trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o777 => Ok(mode),
        _ => Err(ConfigError::InvalidMode(raw.to_string())),
    }
}
