//! Listening endpoint for either transport.
//!
//! # Responsibilities
//! - Bind to the configured TCP address or socket path
//! - Prepare, chmod and chown the socket file
//! - Accept incoming connections as [`RawStream`]s
//! - Remove the socket file when the listener is dropped

use std::io;
#[cfg(unix)]
use std::path::PathBuf;

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use crate::config::{Network, ServerConfig};
use crate::net::stream::{Addr, RawStream};
use crate::server::error::ServerError;

/// A bound listening socket. Dropping it closes the socket and, for
/// filesystem sockets, removes the socket file.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { inner: UnixListener, path: PathBuf },
}

impl Listener {
    /// Bind to the configured endpoint.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let listener = match config.network {
            Network::Tcp => {
                let inner = TcpListener::bind(config.address.as_str())
                    .await
                    .map_err(|source| ServerError::Bind {
                        address: config.address.clone(),
                        source,
                    })?;
                Listener::Tcp(inner)
            }
            #[cfg(unix)]
            Network::Unix => Self::bind_unix(config)?,
            #[cfg(not(unix))]
            Network::Unix => {
                return Err(ServerError::Bind {
                    address: config.address.clone(),
                    source: io::Error::new(
                        io::ErrorKind::Unsupported,
                        "unix sockets are not supported on this platform",
                    ),
                })
            }
        };

        tracing::info!(
            network = %config.network,
            address = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "Listener bound"
        );

        Ok(listener)
    }

    #[cfg(unix)]
    fn bind_unix(config: &ServerConfig) -> Result<Self, ServerError> {
        use crate::net::socket_file::{ensure_socket_file, prepare_socket_path};

        let path = PathBuf::from(&config.address);
        let error_path = path.clone();
        let socket_file_error = move |source: io::Error| ServerError::SocketFile {
            path: error_path.clone(),
            source,
        };

        prepare_socket_path(&path).map_err(&socket_file_error)?;

        let inner = UnixListener::bind(&path).map_err(|source| ServerError::Bind {
            address: config.address.clone(),
            source,
        })?;
        // From here on dropping the listener cleans up the file.
        let listener = Listener::Unix {
            inner,
            path: path.clone(),
        };

        ensure_socket_file(&path, config.file_mode, config.group_id).map_err(&socket_file_error)?;

        Ok(listener)
    }

    /// Accept the next connection. Cancel-safe.
    pub async fn accept(&self) -> io::Result<(RawStream, Addr)> {
        match self {
            Listener::Tcp(inner) => {
                let (stream, peer) = inner.accept().await?;
                Ok((RawStream::Tcp(stream), Addr::Tcp(peer)))
            }
            #[cfg(unix)]
            Listener::Unix { inner, .. } => {
                let (stream, peer) = inner.accept().await?;
                Ok((RawStream::Unix(stream), Addr::from(peer)))
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<Addr> {
        match self {
            Listener::Tcp(inner) => inner.local_addr().map(Addr::Tcp),
            #[cfg(unix)]
            Listener::Unix { path, .. } => Ok(Addr::Unix(Some(path.clone()))),
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            crate::net::socket_file::remove_socket_file(path);
            tracing::debug!(path = %path.display(), "Socket file removed");
        }
    }
}
