//! This crate implements a batched SQL execution service over SQLite.
//! Callers open connections identified by opaque integer handles and submit
//! ordered batches of statements; each batch runs serially on its connection
//! and yields one result per statement.

pub mod types; // Handles, open flags, SQL values, batch operations and results.
pub mod error; // Engine error taxonomy.
pub mod registry; // Handle-to-connection table and encryption key application.
pub mod batch; // Serial batch execution and the worker pool that runs it.
pub mod encoding; // Conversion of batch results into the JSON reply.
pub mod api; // JSON-RPC surface.
pub mod config; // Defines and loads service configuration.

// Re-export commonly used types and configurations for easier access.
pub use types::*;
pub use error::{EngineError, Result};
pub use config::Config;
pub use registry::ConnectionRegistry;
pub use batch::{BatchDispatcher, BatchExecutor};
