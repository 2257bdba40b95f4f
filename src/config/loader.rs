//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::SockdConfig;
use crate::config::validation::{format_errors, validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<SockdConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: SockdConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Network;

    #[test]
    fn loads_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sockd.toml");
        fs::write(
            &path,
            "[server]\nnetwork = \"tcp\"\naddress = \"127.0.0.1:7001\"\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.network, Network::Tcp);
        assert_eq!(config.server.address, "127.0.0.1:7001");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn bad_syntax_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[server\n").unwrap();
        assert!(matches!(load_config(&path).unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn semantic_problems_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invalid.toml");
        fs::write(&path, "[server]\nnetwork = \"tcp\"\naddress = \"\"\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("server address is empty"));
    }
}
