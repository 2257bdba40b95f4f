//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming connection (TCP or filesystem socket)
//!     → socket_file.rs (stale file check, chmod, chown)
//!     → listener.rs (bind, accept)
//!     → stream.rs (unified transport, peer addresses)
//!     → tls.rs (optional upgrade, TCP only)
//!     → idle.rs (per-direction inactivity deadline)
//!     → Hand off to the server engine
//!
//! Connection States (state.rs):
//!     New → Read → Handler → Write → CloseWrite → Close
//! ```
//!
//! # Design Decisions
//! - Every connection is counted from accept until its task finishes
//! - State changes are monotonic; a connection never reports going back
//! - TLS is optional and handled transparently

pub mod connection;
pub mod idle;
pub mod listener;
pub mod socket_file;
pub mod state;
pub mod stream;
pub mod tls;
