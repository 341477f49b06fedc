//! Relay settings, loaded from TOML with per-field defaults.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Sockets beyond this count are refused with an error frame.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How many recent messages are replayed to a newly joined client.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_max_connections() -> usize {
    64
}

fn default_history_limit() -> usize {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            history_limit: default_history_limit(),
        }
    }
}

impl Config {
    /// Parse settings from one TOML file. Absent fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Read `config/default.toml` when it exists, otherwise start from the
    /// built-in defaults.
    pub fn load() -> Result<Self> {
        let path = PathBuf::from("config/default.toml");
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "port = 4200\nhistory_limit = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.port, 4200);
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.max_connections, 64);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "port = \"not a number\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
