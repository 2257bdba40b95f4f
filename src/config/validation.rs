//! Configuration validation.
//!
//! Serde handles syntax; this module checks semantics before a server is
//! built. Every problem is collected rather than stopping at the first.

use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{Network, ServerConfig, SockdConfig};
use crate::net::socket_file::{GROUP_UNCHANGED, MAX_GID};

/// A single semantic configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server address is empty")]
    EmptyAddress,

    #[error("invalid tcp address '{0}'")]
    InvalidTcpAddress(String),

    #[error("unix sockets are not supported on this platform")]
    UnixUnsupported,

    #[error("invalid unix socket path '{0}'")]
    InvalidUnixPath(String),

    #[error("invalid unix group {0}, expected -1..={max}", max = MAX_GID)]
    InvalidGroup(i32),

    #[error("invalid file mode {0:o}, expected at most 0o7777")]
    InvalidFileMode(u32),

    #[error("invalid metrics address '{0}'")]
    InvalidMetricsAddress(String),
}

/// Validate the socket server section.
pub fn validate_server(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.address.trim().is_empty() {
        errors.push(ValidationError::EmptyAddress);
    } else {
        match config.network {
            Network::Tcp => {
                if !is_host_port(&config.address) {
                    errors.push(ValidationError::InvalidTcpAddress(config.address.clone()));
                }
            }
            Network::Unix => {
                if !cfg!(unix) {
                    errors.push(ValidationError::UnixUnsupported);
                } else if Path::new(&config.address).file_name().is_none() {
                    errors.push(ValidationError::InvalidUnixPath(config.address.clone()));
                }
            }
        }
    }

    if config.network == Network::Unix {
        if config.group_id < GROUP_UNCHANGED || config.group_id > MAX_GID {
            errors.push(ValidationError::InvalidGroup(config.group_id));
        }
        if config.file_mode > 0o7777 {
            errors.push(ValidationError::InvalidFileMode(config.file_mode));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the whole daemon configuration.
pub fn validate_config(config: &SockdConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_server(&config.server).err().unwrap_or_default();

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `host:port` shape check. Host names are resolved when the listener
/// binds, not here.
fn is_host_port(address: &str) -> bool {
    if address.parse::<SocketAddr>().is_ok() {
        return true;
    }
    match address.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !host.contains(|c: char| c == ':' || c.is_whitespace())
                && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

/// Render a list of validation errors on one line.
pub fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
