//! User handler contract.

use std::future::Future;
use std::io;

use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;

use crate::server::conn::Conn;

/// Serves one connection. Framing is entirely up to the handler.
///
/// Returning an error (other than the peer simply disconnecting) reports it
/// through the server's error callback. The transport is closed once the
/// returned future completes or is dropped.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, conn: Conn) -> BoxFuture<'static, io::Result<()>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Conn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<()>> + Send + 'static,
{
    fn call(&self, conn: Conn) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(self(conn))
    }
}

/// Writes back everything it reads until the peer half-closes or the server
/// starts draining.
pub async fn echo(conn: Conn) -> io::Result<()> {
    let context = conn.context().clone();
    let (mut reader, mut writer) = tokio::io::split(conn);

    tokio::select! {
        copied = tokio::io::copy(&mut reader, &mut writer) => {
            copied?;
            writer.shutdown().await
        }
        _ = context.draining() => Ok(()),
    }
}
