//! Stream-socket server engine.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;

pub use config::schema::{Network, ServerConfig, SockdConfig};
pub use lifecycle::phase::Phase;
pub use lifecycle::Shutdown;
pub use net::state::ConnState;
pub use net::stream::{Addr, RawStream};
pub use net::tls::Upgrader;
pub use server::{echo, Conn, ConnContext, Handler, Server, ServerError};
