//! Stream-socket server engine.
//!
//! # Data Flow
//! ```text
//! Server::listen
//!     → Listener::bind (socket file prepared, chmod, chown)
//!     → accept loop ── one task per connection ──▶ task.rs
//!                                                   → Upgrader (optional)
//!                                                   → Conn (idle timeout, states)
//!                                                   → Handler
//!
//! Server::shutdown                      Server::close
//!     → stop accepting                      → stop accepting
//!     → signal draining                     → force-close connections
//!     → wait for open connections (grace)   → wait for cleanup
//!     → force-close stragglers              → Stopped
//!     → Stopped
//! ```
//!
//! # Design Decisions
//! - Flags, counters and hooks are atomics or `arc-swap`; no lock is held around I/O
//! - The accept loop owns the listener, so it is closed exactly once
//! - A connection's transport and guard are owned by its task, so cleanup runs
//!   exactly once whether the handler returns, fails, panics or is force-closed

pub mod callbacks;
pub mod conn;
pub mod error;
pub mod handler;
mod task;

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::watch;

use crate::config::validation::validate_server;
use crate::config::{Network, ServerConfig};
use crate::lifecycle::phase::{Phase, PhaseCell};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::Listener;
use crate::net::state::ConnState;
use crate::net::stream::{Addr, RawStream};
use crate::net::tls::Upgrader;

pub use callbacks::Callbacks;
pub use conn::{Conn, ConnContext};
pub use error::ServerError;
pub use handler::{echo, Handler};

use task::ConnectionTask;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);

/// Hook run on every accepted stream before it is handed to its task.
pub type TuneFn = dyn Fn(&RawStream) + Send + Sync;

struct TuneHook(Box<TuneFn>);
struct UpgradeHook(Arc<dyn Upgrader>);

struct Inner {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    upgrader: ArcSwapOption<UpgradeHook>,
    tune: ArcSwapOption<TuneHook>,
    callbacks: Arc<Callbacks>,
    phase: PhaseCell,
    tracker: ConnectionTracker,
    local_addr: OnceLock<Addr>,
    /// Held by the `listen` call that is binding or serving.
    listening: AtomicBool,
    /// True while the accept loop owns the listener.
    accepting: watch::Sender<bool>,
    /// Raised when shutdown begins; never lowered.
    drain: watch::Sender<bool>,
    /// Raised to force-close every connection.
    kill: watch::Sender<bool>,
    done: watch::Sender<bool>,
}

/// A stream-socket server bound to one endpoint.
///
/// Cheap to clone; clones share the same server. Dropping every handle while
/// connections are still open force-closes them.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("network", &self.inner.config.network)
            .field("address", &self.inner.config.address)
            .field("phase", &self.inner.phase.load())
            .field("open_connections", &self.open_connections())
            .finish()
    }
}

impl Server {
    /// Create a server for `config`, serving every connection with `handler`.
    pub fn new(config: ServerConfig, handler: impl Handler) -> Result<Self, ServerError> {
        validate_server(&config).map_err(ServerError::InvalidConfig)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                handler: Arc::new(handler),
                upgrader: ArcSwapOption::empty(),
                tune: ArcSwapOption::empty(),
                callbacks: Arc::new(Callbacks::new()),
                phase: PhaseCell::new(),
                tracker: ConnectionTracker::new(),
                local_addr: OnceLock::new(),
                listening: AtomicBool::new(false),
                accepting: watch::channel(false).0,
                drain: watch::channel(false).0,
                kill: watch::channel(false).0,
                done: watch::channel(false).0,
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Install or remove the TLS upgrader. Only TCP servers accept one.
    /// Takes effect for connections accepted afterwards.
    pub fn set_tls(&self, upgrader: Option<Arc<dyn Upgrader>>) -> Result<(), ServerError> {
        if upgrader.is_some() && self.inner.config.network != Network::Tcp {
            return Err(ServerError::TlsUnsupported);
        }
        self.inner
            .upgrader
            .store(upgrader.map(|u| Arc::new(UpgradeHook(u))));
        Ok(())
    }

    /// Install or remove the connection-tuning hook (socket options, etc.).
    pub fn set_tuning_hook(&self, hook: Option<Box<TuneFn>>) {
        self.inner.tune.store(hook.map(|h| Arc::new(TuneHook(h))));
    }

    /// Direct access to the hook registry, e.g. to clear a callback.
    pub fn callbacks(&self) -> &Callbacks {
        &self.inner.callbacks
    }

    pub fn register_error<F>(&self, f: F)
    where
        F: Fn(&ServerError) + Send + Sync + 'static,
    {
        self.inner.callbacks.set_error(Some(Box::new(f)));
    }

    pub fn register_info<F>(&self, f: F)
    where
        F: Fn(&Addr, &Addr, ConnState) + Send + Sync + 'static,
    {
        self.inner.callbacks.set_info(Some(Box::new(f)));
    }

    pub fn register_server_info<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.callbacks.set_server_info(Some(Box::new(f)));
    }

    /// True from a successful bind until the server has fully stopped.
    pub fn is_running(&self) -> bool {
        matches!(self.inner.phase.load(), Phase::Running | Phase::Draining)
    }

    /// True once shutdown has begun. Never reset.
    pub fn is_gone(&self) -> bool {
        matches!(self.inner.phase.load(), Phase::Draining | Phase::Stopped)
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase.load()
    }

    pub fn open_connections(&self) -> u64 {
        self.inner.tracker.active_count()
    }

    /// Bound address, available once `listen` has bound the endpoint.
    pub fn local_addr(&self) -> Option<Addr> {
        self.inner.local_addr.get().cloned()
    }

    /// Resolves once the server has fully stopped.
    pub async fn done(&self) {
        let mut rx = self.inner.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Bind the endpoint and serve connections.
    ///
    /// Returns `Ok(())` once `shutdown` or `close` has stopped accepting, or
    /// once `signal` resolves, which closes the server with no grace period.
    /// Bind and socket-file failures are returned immediately and leave the
    /// server not running.
    pub async fn listen<S>(&self, signal: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let inner = &self.inner;
        match inner.phase.load() {
            Phase::NotRunning => {}
            Phase::Stopped => return Err(ServerError::Gone),
            Phase::Running | Phase::Draining => return Err(ServerError::AlreadyRunning),
        }
        if inner.listening.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyRunning);
        }

        inner.callbacks.server_info(&format!(
            "starting {} server on {}",
            inner.config.network, inner.config.address
        ));

        let listener = match Listener::bind(&inner.config).await {
            Ok(listener) => listener,
            Err(error) => {
                tracing::error!(error = %error, "Failed to start listener");
                inner.listening.store(false, Ordering::Release);
                return Err(error);
            }
        };
        let local = listener.local_addr().unwrap_or_else(|_| match inner.config.network {
            Network::Tcp => Addr::Tcp(([0, 0, 0, 0], 0).into()),
            Network::Unix => Addr::Unix(Some(inner.config.address.clone().into())),
        });

        inner.accepting.send_replace(true);
        // Lowers `accepting` however this call ends, including cancellation.
        let accepting = AcceptingGuard(&inner.accepting);
        if let Err(found) = inner.phase.transition(Phase::NotRunning, Phase::Running) {
            // Closed while we were binding.
            drop(listener);
            drop(accepting);
            return Err(match found {
                Phase::Stopped => ServerError::Gone,
                _ => ServerError::AlreadyRunning,
            });
        }
        let _ = inner.local_addr.set(local.clone());

        tracing::info!(address = %local, "Server listening");
        inner.callbacks.server_info(&format!("listening on {}", local));

        let signalled = self.accept_loop(listener, &local, signal).await;
        drop(accepting);
        tracing::info!(address = %local, "Listener closed");

        if signalled {
            self.close().await;
        }
        Ok(())
    }

    /// Accept until draining begins or `signal` resolves. Consumes and drops
    /// the listener. Returns `true` if `signal` ended the loop.
    async fn accept_loop<S>(&self, listener: Listener, local: &Addr, signal: S) -> bool
    where
        S: Future<Output = ()> + Send,
    {
        let inner = &self.inner;
        let mut drain = inner.drain.subscribe();
        tokio::pin!(signal);

        let signalled = loop {
            tokio::select! {
                biased;
                _ = raised(&mut drain) => break false,
                _ = &mut signal => break true,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => self.dispatch(stream, remote, local),
                    Err(error) => {
                        let error = ServerError::Accept(error);
                        tracing::warn!(error = %error, "Accept failed; retrying");
                        inner.callbacks.error(&error);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        };

        drop(listener);
        signalled
    }

    fn dispatch(&self, stream: RawStream, remote: Addr, listen_addr: &Addr) {
        let inner = &self.inner;
        let guard = inner.tracker.track();

        if let Some(hook) = inner.tune.load_full() {
            if catch_unwind(AssertUnwindSafe(|| (hook.0)(&stream))).is_err() {
                tracing::warn!(remote = %remote, "Tuning hook panicked; ignoring");
            }
        }

        let local = stream.local_addr().unwrap_or_else(|_| listen_addr.clone());
        let task = ConnectionTask {
            guard,
            stream,
            local,
            remote,
            handler: inner.handler.clone(),
            upgrader: inner.upgrader.load_full().map(|hook| hook.0.clone()),
            callbacks: inner.callbacks.clone(),
            idle_timeout: inner.config.idle_timeout(),
            draining: inner.drain.subscribe(),
            kill: inner.kill.subscribe(),
        };
        tokio::spawn(task.run());
    }

    /// Graceful shutdown using the configured grace period.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        self.shutdown_within(self.inner.config.shutdown_grace()).await
    }

    /// Stop accepting, let open connections finish for up to `grace`, then
    /// force-close whatever remains.
    ///
    /// Returns [`ServerError::ShutdownTimeout`] if connections had to be
    /// force-closed. Calling it on a stopped server returns `Ok(())`.
    pub async fn shutdown_within(&self, grace: Duration) -> Result<(), ServerError> {
        let inner = &self.inner;
        loop {
            match inner.phase.load() {
                Phase::Stopped => return Ok(()),
                Phase::Draining => {
                    self.done().await;
                    return Ok(());
                }
                Phase::NotRunning => {
                    if inner.phase.transition(Phase::NotRunning, Phase::Stopped).is_ok() {
                        self.announce_stopped();
                        return Ok(());
                    }
                }
                Phase::Running => {
                    if inner.phase.transition(Phase::Running, Phase::Draining).is_ok() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            open_connections = self.open_connections(),
            grace_ms = grace.as_millis() as u64,
            "Draining connections"
        );
        inner.callbacks.server_info("draining connections");
        inner.drain.send_replace(true);
        self.listener_closed().await;

        let result = if inner.tracker.wait_idle_within(grace).await {
            Ok(())
        } else {
            let remaining = inner.tracker.active_count();
            tracing::warn!(remaining, "Shutdown grace expired; force-closing connections");
            inner.kill.send_replace(true);
            inner.tracker.wait_idle().await;
            Err(ServerError::ShutdownTimeout { remaining })
        };

        self.mark_stopped();
        result
    }

    /// Abrupt shutdown: stop accepting and force-close every connection
    /// without waiting for handlers to finish. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        loop {
            match inner.phase.load() {
                Phase::Stopped => return,
                Phase::Draining => break,
                Phase::NotRunning => {
                    if inner.phase.transition(Phase::NotRunning, Phase::Stopped).is_ok() {
                        self.announce_stopped();
                        return;
                    }
                }
                Phase::Running => {
                    if inner.phase.transition(Phase::Running, Phase::Draining).is_ok() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            open_connections = self.open_connections(),
            "Closing server"
        );
        inner.callbacks.server_info("closing server");
        inner.drain.send_replace(true);
        inner.kill.send_replace(true);
        self.listener_closed().await;
        inner.tracker.wait_idle().await;
        self.mark_stopped();
    }

    async fn listener_closed(&self) {
        let mut rx = self.inner.accepting.subscribe();
        let _ = rx.wait_for(|accepting| !*accepting).await;
    }

    fn mark_stopped(&self) {
        if self.inner.phase.stop() != Phase::Stopped {
            self.announce_stopped();
        }
    }

    fn announce_stopped(&self) {
        self.inner.done.send_replace(true);
        tracing::info!("Server stopped");
        self.inner.callbacks.server_info("server stopped");
    }
}

struct AcceptingGuard<'a>(&'a watch::Sender<bool>);

impl Drop for AcceptingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

/// Resolves once `rx` holds `true` or its sender is gone.
async fn raised(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|raised| *raised).await;
}
