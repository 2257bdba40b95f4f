//! Transport types shared by the listener, the TLS seam and connections.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

/// Any bidirectional byte stream the server can hand to a handler.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased transport, as produced by an [`Upgrader`](crate::net::tls::Upgrader).
pub type BoxedStream = Box<dyn Stream>;

/// Endpoint address of either transport kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addr {
    Tcp(SocketAddr),
    /// Filesystem socket. Client ends are usually unnamed.
    Unix(Option<PathBuf>),
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Tcp(addr) => write!(f, "{}", addr),
            Addr::Unix(Some(path)) => write!(f, "{}", path.display()),
            Addr::Unix(None) => f.write_str("@unnamed"),
        }
    }
}

#[cfg(unix)]
impl From<tokio::net::unix::SocketAddr> for Addr {
    fn from(addr: tokio::net::unix::SocketAddr) -> Self {
        Addr::Unix(addr.as_pathname().map(|p| p.to_path_buf()))
    }
}

/// Freshly accepted transport, before any TLS upgrade.
///
/// Exposed to the connection-tuning hook so socket options can be set on the
/// concrete stream type.
#[derive(Debug)]
pub enum RawStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl RawStream {
    pub fn local_addr(&self) -> io::Result<Addr> {
        match self {
            RawStream::Tcp(s) => s.local_addr().map(Addr::Tcp),
            #[cfg(unix)]
            RawStream::Unix(s) => s.local_addr().map(Addr::from),
        }
    }

    pub fn peer_addr(&self) -> io::Result<Addr> {
        match self {
            RawStream::Tcp(s) => s.peer_addr().map(Addr::Tcp),
            #[cfg(unix)]
            RawStream::Unix(s) => s.peer_addr().map(Addr::from),
        }
    }
}

impl AsyncRead for RawStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RawStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
