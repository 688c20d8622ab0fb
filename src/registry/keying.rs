//! Encryption key application.
//!
//! Keying happens in two steps. `configure` runs before the connection is
//! established, so the key reaches the storage engine ahead of any other
//! statement; `verify` runs on the fresh connection before its handle is
//! published.

use crate::config::KeyProvider;
use async_trait::async_trait;
use sqlx::SqliteConnection;
use sqlx::sqlite::SqliteConnectOptions;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait KeyApplier: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Attach the key to the connect options.
    fn configure(&self, options: SqliteConnectOptions, key: &str) -> SqliteConnectOptions;

    /// Confirm the key took effect. The error string is reported to the caller.
    async fn verify(&self, conn: &mut SqliteConnection, key: &str) -> Result<(), String>;
}

/// Build the applier selected in configuration.
pub fn key_applier(provider: KeyProvider) -> Arc<dyn KeyApplier> {
    match provider {
        KeyProvider::Sqlcipher => Arc::new(SqlCipherKeyer),
        KeyProvider::Fauxcrypt => Arc::new(FauxCryptKeyer),
    }
}

/// `PRAGMA key` for SQLCipher-compatible builds.
pub struct SqlCipherKeyer;

#[async_trait]
impl KeyApplier for SqlCipherKeyer {
    fn name(&self) -> &'static str {
        "sqlcipher"
    }

    fn configure(&self, options: SqliteConnectOptions, key: &str) -> SqliteConnectOptions {
        // sqlx runs the `key` pragma first among its connect-time pragmas
        options.pragma("key", format!("'{}'", key.replace('\'', "''")))
    }

    async fn verify(&self, conn: &mut SqliteConnection, _key: &str) -> Result<(), String> {
        // Plain SQLite ignores unknown pragmas, so an absent cipher_version
        // means the key was never applied.
        let version: Option<String> = sqlx::query_scalar("PRAGMA cipher_version")
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| e.to_string())?;
        let Some(version) = version else {
            return Err("storage engine does not support encryption keys".to_string());
        };
        debug!("cipher version {}", version);

        sqlx::query("SELECT count(*) FROM sqlite_master")
            .execute(&mut *conn)
            .await
            .map_err(|e| format!("password key error: {}", e))?;
        Ok(())
    }
}

/// Demo shim that accepts exactly one key.
pub struct FauxCryptKeyer;

impl FauxCryptKeyer {
    pub const CORRECT_KEY: &'static str = "correct";
}

#[async_trait]
impl KeyApplier for FauxCryptKeyer {
    fn name(&self) -> &'static str {
        "fauxcrypt"
    }

    fn configure(&self, options: SqliteConnectOptions, _key: &str) -> SqliteConnectOptions {
        options
    }

    async fn verify(&self, _conn: &mut SqliteConnection, key: &str) -> Result<(), String> {
        if key == Self::CORRECT_KEY {
            Ok(())
        } else {
            Err("password key error".to_string())
        }
    }
}
