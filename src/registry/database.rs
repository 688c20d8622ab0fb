//! Connection Registry
//!
//! Maps opaque integer handles to live SQLite connections. Handle allocation,
//! lookup and removal all go through one registry-wide lock; statement
//! execution never holds it.
//!
//! # Handles
//! Handles come from a counter that starts at 1 and only grows, so a handle is
//! never reused for the lifetime of the registry.

use crate::{
    EngineError, Handle, OpenFlags, Result,
    config::{DatabaseConfig, KeyProvider},
    registry::keying::{KeyApplier, key_applier},
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection as _, SqliteConnection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Storage behind a connection's lock
pub(crate) struct Storage {
    /// `None` once the connection has been closed
    pub(crate) conn: Option<SqliteConnection>,
    /// Set after a fatal fault; later batches fail immediately
    pub(crate) broken: Option<String>,
}

/// A live database connection
///
/// The storage mutex is held for the whole of a batch, which serializes
/// batches submitted against the same handle.
pub struct Connection {
    handle: Handle,
    path: String,
    flags: OpenFlags,
    keyed: bool,
    opened_at: DateTime<Utc>,
    storage: Mutex<Storage>,
}

impl Connection {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().await
    }

    /// Close the underlying storage, waiting for any in-flight batch first.
    async fn shutdown(&self) {
        let mut storage = self.storage.lock().await;
        if let Some(conn) = storage.conn.take() {
            if let Err(e) = conn.close().await {
                warn!("Error closing connection {}: {}", self.handle, e);
            }
        }
        let lifetime = Utc::now() - self.opened_at;
        info!(
            "Closed connection {} ({}) after {}s",
            self.handle,
            self.path,
            lifetime.num_seconds()
        );
    }
}

struct Slots {
    next_handle: Handle,
    live: HashMap<Handle, Arc<Connection>>,
}

/// Process-wide table of open connections
pub struct ConnectionRegistry {
    slots: RwLock<Slots>,
    base_dir: Option<PathBuf>,
    keyer: Arc<dyn KeyApplier>,
}

impl ConnectionRegistry {
    /// Creates a registry using the configured storage directory and key provider
    /// Creates a registry from the `[database]` config section
    ///
    /// # Arguments
    /// * `config` - Database settings; `base_dir` anchors relative paths
    /// * `provider` - Which key applier handles non-empty keys
    pub fn new(config: &DatabaseConfig, provider: KeyProvider) -> Self {
        Self::with_keyer(config.base_dir.clone(), key_applier(provider))
    }

    /// Creates a registry with an explicit key applier
    pub fn with_keyer(base_dir: Option<PathBuf>, keyer: Arc<dyn KeyApplier>) -> Self {
        Self {
            slots: RwLock::new(Slots {
                next_handle: 1,
                live: HashMap::new(),
            }),
            base_dir,
            keyer,
        }
    }

    /// Open a connection and return its handle
    ///
    /// A non-empty `key` is applied and verified before the handle is
    /// allocated, so no caller can reach the connection ahead of keying.
    ///
    /// # Arguments
    /// * `path` - Database file, relative to `base_dir` when configured
    /// * `flags` - `OpenFlags` bits; `IN_MEMORY` ignores `path`
    /// * `key` - Password key, or empty for none
    ///
    /// # Returns
    /// A fresh handle, never equal to any handle issued before.
    ///
    /// # Errors
    /// `EngineError::Open` for invalid flags, an unusable path, or a key the
    /// storage rejects.
    pub async fn open(&self, path: &str, flags: OpenFlags, key: &str) -> Result<Handle> {
        // Step 1: Reject bad flags before touching storage
        flags.validate().map_err(EngineError::Open)?;

        // Step 2: Build connect options and attach the key
        let mut options = self.connect_options(path, flags).await?;
        if !key.is_empty() {
            options = self.keyer.configure(options, key);
        }

        // Step 3: Open the storage
        let mut conn = options
            .connect()
            .await
            .map_err(|e| EngineError::Open(format!("cannot open {}: {}", path, e)))?;

        // Step 4: Verify the key; a rejected connection is closed, not published
        if !key.is_empty() {
            debug!("Applying {} key to {}", self.keyer.name(), path);
            if let Err(reason) = self.keyer.verify(&mut conn, key).await {
                if let Err(e) = conn.close().await {
                    warn!("Error closing rejected connection to {}: {}", path, e);
                }
                return Err(EngineError::Open(reason));
            }
        }

        // Step 5: Allocate the handle and publish the connection
        let mut slots = self.slots.write().await;
        let handle = slots.next_handle;
        slots.next_handle += 1;
        slots.live.insert(
            handle,
            Arc::new(Connection {
                handle,
                path: path.to_string(),
                flags,
                keyed: !key.is_empty(),
                opened_at: Utc::now(),
                storage: Mutex::new(Storage {
                    conn: Some(conn),
                    broken: None,
                }),
            }),
        );
        drop(slots);

        info!("Opened connection {} to {} (flags {:#x})", handle, path, flags.bits());
        Ok(handle)
    }

    /// Resolve a handle to its live connection
    ///
    /// # Arguments
    /// * `handle` - Handle returned by `open`
    ///
    /// # Returns
    /// A shared reference to the connection; batches lock it before use.
    ///
    /// # Errors
    /// `EngineError::UnknownHandle` if the handle was never issued or is closed.
    pub async fn lookup(&self, handle: Handle) -> Result<Arc<Connection>> {
        let slots = self.slots.read().await;
        slots
            .live
            .get(&handle)
            .cloned()
            .ok_or(EngineError::UnknownHandle(handle))
    }

    /// Close a connection
    ///
    /// The handle is unpublished first, so new batches fail fast while an
    /// in-flight batch on the same connection is allowed to finish.
    ///
    /// # Arguments
    /// * `handle` - Handle returned by `open`
    ///
    /// # Errors
    /// `EngineError::UnknownHandle` if the handle is not open, including a
    /// second close of the same handle.
    pub async fn close(&self, handle: Handle) -> Result<()> {
        // Unpublish under the write lock, then close outside it
        let conn = {
            let mut slots = self.slots.write().await;
            slots
                .live
                .remove(&handle)
                .ok_or(EngineError::UnknownHandle(handle))?
        };
        conn.shutdown().await;
        Ok(())
    }

    /// Close every open connection (process shutdown)
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Connection>> = {
            let mut slots = self.slots.write().await;
            slots.live.drain().map(|(_, conn)| conn).collect()
        };
        info!("Closing {} open connections", drained.len());
        for conn in drained {
            conn.shutdown().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn connect_options(&self, path: &str, flags: OpenFlags) -> Result<SqliteConnectOptions> {
        if flags.contains(OpenFlags::IN_MEMORY) {
            return SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| EngineError::Open(e.to_string()));
        }
        if path.trim().is_empty() {
            return Err(EngineError::Open("empty database path".to_string()));
        }

        let resolved = self.resolve(path);
        if flags.contains(OpenFlags::CREATE_IF_MISSING) {
            if let Some(parent) = resolved.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    EngineError::Open(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        Ok(SqliteConnectOptions::new()
            .filename(resolved)
            .create_if_missing(flags.contains(OpenFlags::CREATE_IF_MISSING))
            .read_only(flags.contains(OpenFlags::READ_ONLY)))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}
