//! OS signal handling.
//!
//! SIGINT and SIGTERM are translated into [`Shutdown`] triggers. The
//! receiver decides what repeated signals mean.

use std::io;

use crate::lifecycle::shutdown::Shutdown;

/// Forward termination signals to `shutdown` until the process exits.
pub fn spawn_signal_listener(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut signals = match TerminationSignals::new() {
            Ok(signals) => signals,
            Err(error) => {
                tracing::error!(error = %error, "Failed to install signal handlers");
                return;
            }
        };

        loop {
            match signals.next().await {
                Ok(signal) => {
                    tracing::info!(signal, "Termination signal received");
                    shutdown.trigger();
                }
                Err(error) => {
                    tracing::error!(error = %error, "Signal stream failed");
                    return;
                }
            }
        }
    })
}

#[cfg(unix)]
struct TerminationSignals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn next(&mut self) -> io::Result<&'static str> {
        tokio::select! {
            _ = self.terminate.recv() => Ok("SIGTERM"),
            _ = self.interrupt.recv() => Ok("SIGINT"),
        }
    }
}

#[cfg(not(unix))]
struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> io::Result<&'static str> {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}
