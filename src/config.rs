//! Configuration Module
//!
//! This module defines all configuration structures for the batch service.
//! Configuration is loaded from TOML files and parsed using serde.

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Main configuration structure
///
/// Loaded from a TOML file (e.g., config/default.toml).
///
/// # Example TOML
/// ```toml
/// [api]
/// host = "127.0.0.1"
/// port = 8546
///
/// [engine]
/// max_concurrent_batches = 16
/// key_provider = "sqlcipher"
///
/// [database]
/// base_dir = "data"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// API server configuration
///
/// # Fields
/// - `host`: IP address to bind to (e.g., "127.0.0.1" or "0.0.0.0")
/// - `port`: TCP port to listen on
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Batch engine configuration
///
/// # Fields
/// - `max_concurrent_batches`: Worker pool bound; `0` means unbounded
/// - `key_provider`: How encryption keys are applied on open
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default)]
    pub key_provider: KeyProvider,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: default_max_concurrent_batches(),
            key_provider: KeyProvider::default(),
        }
    }
}

fn default_max_concurrent_batches() -> usize {
    16
}

/// Encryption key application strategy
///
/// - `"sqlcipher"`: `PRAGMA key`, requires a SQLite build with cipher support
/// - `"fauxcrypt"`: demo shim that only accepts the key `correct`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyProvider {
    #[default]
    Sqlcipher,
    Fauxcrypt,
}

/// Database storage configuration
///
/// # Fields
/// - `base_dir`: Directory that relative database paths are resolved against.
///   When unset, relative paths resolve against the working directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    pub base_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    /// * `Ok(Config)` if the file was successfully loaded and parsed
    /// * `Err` if the file couldn't be read or the TOML is invalid
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [api]
            host = "0.0.0.0"
            port = 9000

            [engine]
            max_concurrent_batches = 4
            key_provider = "fauxcrypt"

            [database]
            base_dir = "/var/lib/batchql"
            "#,
        )
        .unwrap();

        assert_eq!(config.api.port, 9000);
        assert_eq!(config.engine.max_concurrent_batches, 4);
        assert_eq!(config.engine.key_provider, KeyProvider::Fauxcrypt);
        assert_eq!(config.database.base_dir, Some(PathBuf::from("/var/lib/batchql")));
    }

    #[test]
    fn test_engine_and_database_sections_are_optional() {
        let config = Config::parse("[api]\nhost = \"127.0.0.1\"\nport = 8546\n").unwrap();

        assert_eq!(config.engine.max_concurrent_batches, 16);
        assert_eq!(config.engine.key_provider, KeyProvider::Sqlcipher);
        assert!(config.database.base_dir.is_none());
    }

    #[test]
    fn test_unknown_key_provider_is_rejected() {
        let result = Config::parse(
            "[api]\nhost = \"127.0.0.1\"\nport = 1\n[engine]\nkey_provider = \"rot13\"\n",
        );
        assert!(result.is_err());
    }
}
