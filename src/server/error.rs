//! Server error taxonomy.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::validation::{format_errors, ValidationError};
use crate::net::stream::Addr;

/// Errors raised by the socket server.
///
/// Setup failures are returned from [`Server::listen`](crate::Server::listen).
/// Accept and connection failures only ever reach the error callback.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration rejected by validation.
    #[error("invalid server configuration: {}", format_errors(.0))]
    InvalidConfig(Vec<ValidationError>),

    /// Failed to bind the listening endpoint.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to prepare or set permissions on the socket file.
    #[error("socket file {}: {source}", path.display())]
    SocketFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `listen` called while the server is already running.
    #[error("server is already running")]
    AlreadyRunning,

    /// `listen` called after the server stopped; servers cannot be restarted.
    #[error("server has been shut down")]
    Gone,

    /// TLS requested on a transport that does not support it.
    #[error("tls is only supported on tcp listeners")]
    TlsUnsupported,

    /// Transient accept failure.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Transport upgrade (TLS handshake) failed.
    #[error("upgrade failed for {remote}: {source}")]
    Upgrade {
        remote: Addr,
        #[source]
        source: io::Error,
    },

    /// Handler returned an I/O error, including idle timeouts.
    #[error("connection {remote}: {source}")]
    Connection {
        remote: Addr,
        #[source]
        source: io::Error,
    },

    /// Handler panicked.
    #[error("handler panicked for {remote}: {message}")]
    HandlerPanic { remote: Addr, message: String },

    /// Connections were still open when the shutdown grace expired.
    #[error("shutdown timed out with {remaining} open connection(s)")]
    ShutdownTimeout { remaining: u64 },
}

impl ServerError {
    /// Short identifier suitable for metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::InvalidConfig(_) => "invalid_config",
            ServerError::Bind { .. } => "bind",
            ServerError::SocketFile { .. } => "socket_file",
            ServerError::AlreadyRunning => "already_running",
            ServerError::Gone => "gone",
            ServerError::TlsUnsupported => "tls_unsupported",
            ServerError::Accept(_) => "accept",
            ServerError::Upgrade { .. } => "upgrade",
            ServerError::Connection { .. } if self.is_idle_timeout() => "idle_timeout",
            ServerError::Connection { .. } => "connection",
            ServerError::HandlerPanic { .. } => "panic",
            ServerError::ShutdownTimeout { .. } => "shutdown_timeout",
        }
    }

    /// True for a connection closed by the idle timeout, during the
    /// upgrade or while the handler ran.
    pub fn is_idle_timeout(&self) -> bool {
        matches!(
            self,
            ServerError::Connection { source, .. } | ServerError::Upgrade { source, .. }
                if source.kind() == io::ErrorKind::TimedOut
        )
    }

    /// True for errors confined to one connection.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            ServerError::Upgrade { .. }
                | ServerError::Connection { .. }
                | ServerError::HandlerPanic { .. }
        )
    }
}

/// Returns true for errors that only mean the peer went away.
///
/// These are expected whenever a client disconnects mid-exchange and are
/// logged rather than reported.
pub fn is_peer_gone(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
