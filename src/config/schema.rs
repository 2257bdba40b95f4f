//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files and
//! carry defaults, so a minimal file only needs to name what it changes.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::socket_file::GROUP_UNCHANGED;

/// Shutdown grace applied when the configuration does not set one.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 10_000;

/// Root configuration for the daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SockdConfig {
    /// Socket server settings.
    pub server: ServerConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Transport the server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Generic stream socket (`host:port`).
    Tcp,
    /// Filesystem-addressed stream socket.
    Unix,
}

impl Network {
    pub fn code(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Unix => "unix",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(format!("unknown network '{}', expected tcp or unix", other)),
        }
    }
}

/// Socket server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Transport kind.
    pub network: Network,

    /// `host:port` for TCP, socket file path for Unix.
    pub address: String,

    /// Permission bits applied to the socket file (Unix only).
    pub file_mode: u32,

    /// Group id applied to the socket file; `-1` leaves it unchanged (Unix only).
    pub group_id: i32,

    /// Idle connection timeout in milliseconds. Zero disables it.
    pub idle_timeout_ms: u64,

    /// Time allowed for connections to drain on graceful shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            #[cfg(unix)]
            network: Network::Unix,
            #[cfg(not(unix))]
            network: Network::Tcp,
            #[cfg(unix)]
            address: "/tmp/sockd.sock".to_string(),
            #[cfg(not(unix))]
            address: "127.0.0.1:7070".to_string(),
            file_mode: 0o660,
            group_id: GROUP_UNCHANGED,
            idle_timeout_ms: 0,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl ServerConfig {
    /// Filesystem socket at `path` with default settings.
    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            network: Network::Unix,
            address: path.into(),
            ..Self::default()
        }
    }

    /// TCP socket at `address` with default settings.
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            network: Network::Tcp,
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub fn with_group_id(mut self, gid: i32) -> Self {
        self.group_id = gid;
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "sockd=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
