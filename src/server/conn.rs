//! The connection handed to user handlers.
//!
//! [`Conn`] wraps the (possibly upgraded) transport, enforces the idle
//! timeout on every read and write, and reports lifecycle states as the
//! handler reaches them. Use [`tokio::io::split`] for separate reader and
//! writer views.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::watch;

use crate::net::connection::ConnectionId;
use crate::net::idle::{Direction, IdleTimer};
use crate::net::state::{ConnState, StateGate};
use crate::net::stream::{Addr, BoxedStream};
use crate::server::callbacks::Callbacks;

/// Emits a connection's state changes in non-decreasing order.
#[derive(Debug)]
pub(crate) struct StateReporter {
    gate: StateGate,
    local: Addr,
    remote: Addr,
    id: ConnectionId,
    callbacks: Arc<Callbacks>,
}

impl StateReporter {
    pub(crate) fn new(id: ConnectionId, local: Addr, remote: Addr, callbacks: Arc<Callbacks>) -> Self {
        Self {
            gate: StateGate::new(),
            local,
            remote,
            id,
            callbacks,
        }
    }

    pub(crate) fn advance(&self, state: ConnState) {
        if self.gate.advance(state) {
            tracing::trace!(connection_id = %self.id, remote = %self.remote, state = %state, "Connection state");
            self.callbacks.info(&self.local, &self.remote, state);
        }
    }

    pub(crate) fn current(&self) -> Option<ConnState> {
        self.gate.current()
    }
}

/// Per-connection metadata and the server's draining signal.
#[derive(Debug, Clone)]
pub struct ConnContext {
    id: ConnectionId,
    local: Addr,
    remote: Addr,
    draining: watch::Receiver<bool>,
}

impl ConnContext {
    pub(crate) fn new(id: ConnectionId, local: Addr, remote: Addr, draining: watch::Receiver<bool>) -> Self {
        Self {
            id,
            local,
            remote,
            draining,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn local_addr(&self) -> &Addr {
        &self.local
    }

    pub fn remote_addr(&self) -> &Addr {
        &self.remote
    }

    /// True once the server has started shutting down.
    pub fn is_draining(&self) -> bool {
        *self.draining.borrow()
    }

    /// Resolves once the server starts shutting down. Handlers that select
    /// on this can finish early instead of being force-closed.
    pub async fn draining(&self) {
        let mut rx = self.draining.clone();
        // A dropped sender means the server is gone; treat that as draining.
        let _ = rx.wait_for(|draining| *draining).await;
    }
}

/// A client connection, as seen by the handler.
pub struct Conn {
    stream: BoxedStream,
    idle: Option<IdleTimer>,
    reporter: Arc<StateReporter>,
    context: ConnContext,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("context", &self.context)
            .field("idle_timeout", &self.idle_timeout())
            .finish()
    }
}

impl Conn {
    pub(crate) fn new(
        stream: BoxedStream,
        idle_timeout: Option<Duration>,
        reporter: Arc<StateReporter>,
        context: ConnContext,
    ) -> Self {
        Self {
            stream,
            idle: idle_timeout.map(IdleTimer::new),
            reporter,
            context,
        }
    }

    pub fn context(&self) -> &ConnContext {
        &self.context
    }

    pub fn local_addr(&self) -> &Addr {
        self.context.local_addr()
    }

    pub fn remote_addr(&self) -> &Addr {
        self.context.remote_addr()
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle.as_ref().map(IdleTimer::timeout)
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(idle) = this.idle.as_mut() {
            idle.check_start(Direction::Read)?;
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.stream).poll_read(cx, buf) {
            Poll::Ready(result) => {
                if let Some(idle) = this.idle.as_mut() {
                    idle.completed(Direction::Read, buf.filled().len() > before);
                }
                Poll::Ready(result)
            }
            Poll::Pending => match this.idle.as_mut() {
                Some(idle) => idle.poll_expired(Direction::Read, cx).map(Err),
                None => Poll::Pending,
            },
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(idle) = this.idle.as_mut() {
            idle.check_start(Direction::Write)?;
        }

        match Pin::new(&mut this.stream).poll_write(cx, buf) {
            Poll::Ready(result) => {
                let written = matches!(result, Ok(n) if n > 0);
                if let Some(idle) = this.idle.as_mut() {
                    idle.completed(Direction::Write, written);
                }
                if written {
                    this.reporter.advance(ConnState::Write);
                }
                Poll::Ready(result)
            }
            Poll::Pending => match this.idle.as_mut() {
                Some(idle) => idle.poll_expired(Direction::Write, cx).map(Err),
                None => Poll::Pending,
            },
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.stream).poll_shutdown(cx);
        if let Poll::Ready(Ok(())) = result {
            this.reporter.advance(ConnState::CloseWrite);
        }
        result
    }
}
