//! Per-connection task.
//!
//! Drives one accepted connection from `New` to `Close`: optional upgrade,
//! handler invocation with panic containment, error reporting, and cleanup.
//! Cleanup happens exactly once because the transport and the connection
//! guard are owned by this task and dropped at its end, whichever way the
//! handler finishes.

use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;

use crate::net::connection::ConnectionGuard;
use crate::net::idle::idle_timeout_error;
use crate::net::state::ConnState;
use crate::net::stream::{Addr, BoxedStream, RawStream};
use crate::net::tls::Upgrader;
use crate::server::callbacks::{panic_message, Callbacks};
use crate::server::conn::{Conn, ConnContext, StateReporter};
use crate::server::error::{is_peer_gone, ServerError};
use crate::server::handler::Handler;

/// Everything a connection task needs, captured at accept time.
pub(crate) struct ConnectionTask {
    pub guard: ConnectionGuard,
    pub stream: RawStream,
    pub local: Addr,
    pub remote: Addr,
    pub handler: Arc<dyn Handler>,
    pub upgrader: Option<Arc<dyn Upgrader>>,
    pub callbacks: Arc<Callbacks>,
    pub idle_timeout: Option<Duration>,
    pub draining: watch::Receiver<bool>,
    pub kill: watch::Receiver<bool>,
}

impl ConnectionTask {
    pub(crate) async fn run(self) {
        let ConnectionTask {
            guard,
            stream,
            local,
            remote,
            handler,
            upgrader,
            callbacks,
            idle_timeout,
            draining,
            mut kill,
        } = self;

        let id = guard.id();
        let reporter = Arc::new(StateReporter::new(
            id,
            local.clone(),
            remote.clone(),
            callbacks.clone(),
        ));
        reporter.advance(ConnState::New);
        tracing::debug!(connection_id = %id, remote = %remote, "Connection opened");

        let serve = {
            let reporter = reporter.clone();
            let remote = remote.clone();
            async move {
                let stream: BoxedStream = match upgrader {
                    Some(upgrader) => upgrade(upgrader.as_ref(), stream, idle_timeout)
                        .await
                        .map_err(|source| ServerError::Upgrade {
                            remote: remote.clone(),
                            source,
                        })?,
                    None => Box::new(stream),
                };

                let context = ConnContext::new(id, local, remote.clone(), draining);
                let conn = Conn::new(stream, idle_timeout, reporter.clone(), context);

                reporter.advance(ConnState::Read);
                reporter.advance(ConnState::Handler);
                handler.call(conn).await.map_err(|source| ServerError::Connection {
                    remote,
                    source,
                })
            }
        };

        // The transport lives inside `serve`; it is closed when `serve`
        // completes or is dropped by a forced close.
        let outcome = tokio::select! {
            result = AssertUnwindSafe(serve).catch_unwind() => Some(result),
            _ = killed(&mut kill) => None,
        };

        match outcome {
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(error))) => report(&callbacks, error),
            Some(Err(payload)) => report(
                &callbacks,
                ServerError::HandlerPanic {
                    remote: remote.clone(),
                    message: panic_message(payload.as_ref()),
                },
            ),
            None => {
                tracing::debug!(
                    connection_id = %id,
                    remote = %remote,
                    last_state = ?reporter.current(),
                    "Connection force-closed"
                );
            }
        }

        if reporter.current() >= Some(ConnState::Handler) {
            reporter.advance(ConnState::CloseWrite);
        }
        drop(guard);
        reporter.advance(ConnState::Close);
        tracing::debug!(connection_id = %id, remote = %remote, "Connection closed");
    }
}

/// Run the upgrade, bounded by the idle timeout when one is set. A peer
/// that stalls the handshake is treated like any other idle peer.
async fn upgrade(
    upgrader: &dyn Upgrader,
    stream: RawStream,
    idle_timeout: Option<Duration>,
) -> io::Result<BoxedStream> {
    let handshake = upgrader.upgrade(stream);
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| idle_timeout_error(limit))?,
        None => handshake.await,
    }
}

/// Resolves on forced close, or when the server itself is gone.
async fn killed(kill: &mut watch::Receiver<bool>) {
    let _ = kill.wait_for(|kill| *kill).await;
}

fn report(callbacks: &Callbacks, error: ServerError) {
    match &error {
        ServerError::Connection { source, .. } | ServerError::Upgrade { source, .. }
            if is_peer_gone(source) =>
        {
            tracing::debug!(error = %error, "Peer disconnected");
        }
        _ => {
            tracing::warn!(error = %error, "Connection failed");
            callbacks.error(&error);
        }
    }
}
