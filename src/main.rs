//! sockd: echo daemon over a stream socket.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!                 │                    sockd                      │
//!   Client        │  ┌──────────┐    ┌──────────┐    ┌─────────┐ │
//!   ──────────────┼─▶│ listener │───▶│  task    │───▶│ handler │ │
//!                 │  │ tcp/unix │    │ per conn │    │ (echo)  │ │
//!                 │  └──────────┘    └──────────┘    └─────────┘ │
//!                 │                                               │
//!                 │  config · lifecycle · observability           │
//!                 └──────────────────────────────────────────────┘
//! ```
//!
//! The first SIGINT/SIGTERM drains connections for the configured grace
//! period; a second one closes everything immediately.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use sockd::config::validation::{format_errors, validate_config};
use sockd::config::{load_config, Network, SockdConfig};
use sockd::lifecycle::{spawn_signal_listener, Shutdown};
use sockd::observability::{install_hooks, logging, metrics};
use sockd::server::{echo, Server};

#[derive(Debug, Parser)]
#[command(name = "sockd")]
#[command(about = "Echo server over a TCP or Unix stream socket", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the transport (`tcp` or `unix`).
    #[arg(short, long)]
    network: Option<Network>,

    /// Override the listen address or socket path.
    #[arg(short, long)]
    address: Option<String>,

    /// Override the idle timeout in milliseconds (0 disables it).
    #[arg(long)]
    idle_timeout_ms: Option<u64>,
}

impl Cli {
    fn load(&self) -> Result<SockdConfig, String> {
        let mut config = match &self.config {
            Some(path) => load_config(path).map_err(|e| e.to_string())?,
            None => SockdConfig::default(),
        };

        if let Some(network) = self.network {
            config.server.network = network;
        }
        if let Some(address) = &self.address {
            config.server.address = address.clone();
        }
        if let Some(ms) = self.idle_timeout_ms {
            config.server.idle_timeout_ms = ms;
        }

        validate_config(&config).map_err(|errors| format_errors(&errors))?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.load() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("sockd: {}", message);
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sockd starting");
    tracing::info!(
        network = %config.server.network,
        address = %config.server.address,
        idle_timeout_ms = config.server.idle_timeout_ms,
        shutdown_grace_ms = config.server.shutdown_grace_ms,
        "Configuration loaded"
    );

    let metrics_enabled = config.observability.metrics_enabled;
    if metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = match Server::new(config.server, echo) {
        Ok(server) => server,
        Err(error) => {
            tracing::error!(error = %error, "Invalid server configuration");
            return ExitCode::FAILURE;
        }
    };
    install_hooks(&server, metrics_enabled);

    let shutdown = Shutdown::new();
    let mut requests = shutdown.subscribe();
    let signals = spawn_signal_listener(shutdown);

    let coordinator = {
        let server = server.clone();
        tokio::spawn(async move {
            if !requests.recv().await {
                return;
            }
            let draining = server.clone();
            let drain = tokio::spawn(async move { draining.shutdown().await });

            tokio::select! {
                result = drain => match result {
                    Ok(Ok(())) => tracing::info!("Graceful shutdown complete"),
                    Ok(Err(error)) => tracing::warn!(error = %error, "Graceful shutdown incomplete"),
                    Err(error) => tracing::error!(error = %error, "Shutdown task failed"),
                },
                again = requests.recv() => if again {
                    tracing::warn!("Second signal received; closing immediately");
                    server.close().await;
                },
            }
        })
    };

    let status = match server.listen(std::future::pending()).await {
        Ok(()) => {
            server.done().await;
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(error = %error, kind = error.kind(), "Failed to start");
            ExitCode::FAILURE
        }
    };

    signals.abort();
    coordinator.abort();
    tracing::info!("Shutdown complete");
    status
}
