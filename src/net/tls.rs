//! Optional transport upgrade (TLS) seam.
//!
//! Certificate loading and cipher selection live outside this crate. The
//! server only needs something that can turn an accepted [`RawStream`] into
//! an encrypted [`BoxedStream`].

use std::future::Future;
use std::io;

use futures_util::future::BoxFuture;

use crate::net::stream::{BoxedStream, RawStream};

/// Upgrades an accepted transport before it reaches the handler.
///
/// A failed upgrade is a per-connection error: the connection is closed and
/// the server keeps accepting.
pub trait Upgrader: Send + Sync + 'static {
    fn upgrade(&self, stream: RawStream) -> BoxFuture<'static, io::Result<BoxedStream>>;
}

impl<F, Fut> Upgrader for F
where
    F: Fn(RawStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<BoxedStream>> + Send + 'static,
{
    fn upgrade(&self, stream: RawStream) -> BoxFuture<'static, io::Result<BoxedStream>> {
        Box::pin(self(stream))
    }
}

/// Pass-through upgrader; equivalent to having no upgrader at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plaintext;

impl Upgrader for Plaintext {
    fn upgrade(&self, stream: RawStream) -> BoxFuture<'static, io::Result<BoxedStream>> {
        Box::pin(async move { Ok(Box::new(stream) as BoxedStream) })
    }
}
