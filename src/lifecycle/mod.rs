//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Server phases (phase.rs):
//!     NotRunning → Running → Draining → Stopped
//!
//! Process shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → broadcast → Server::shutdown
//!     second signal  → broadcast → Server::close
//! ```
//!
//! # Design Decisions
//! - Phases only move forward; a stopped server cannot be restarted
//! - Shutdown has a grace period: forced close after the deadline

pub mod phase;
pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::spawn_signal_listener;
