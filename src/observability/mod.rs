//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Server callbacks (error, connection state, lifecycle)
//!     → hooks.rs (fan-out)
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - The engine has no opinion on sinks; everything here hangs off callbacks
//! - Metrics are cheap (atomic increments in the recorder)

pub mod hooks;
pub mod logging;
pub mod metrics;

pub use hooks::install_hooks;
