//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks)
//!     → SockdConfig (validated, immutable)
//!     → ServerConfig handed to Server::new
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Server::new validates again, so programmatic configs get the same checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{LogFormat, Network, ObservabilityConfig, ServerConfig, SockdConfig};
pub use validation::ValidationError;
