//! Error taxonomy for the engine.
//!
//! Errors stay structured inside the crate and are only rendered to strings
//! at the API boundary.

use crate::Handle;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad path, flags or key while opening a connection
    #[error("open error: {0}")]
    Open(String),

    /// Stale or never-issued handle
    #[error("unknown connection handle: {0}")]
    UnknownHandle(Handle),

    /// Per-statement failure; recoverable, captured into the batch results
    #[error("statement error {code}: {message}")]
    Statement { code: i32, message: String },

    /// Connection-level failure that aborts the rest of a batch
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Failure in the engine's own plumbing (worker crash, malformed input)
    #[error("internal error: {0}")]
    Internal(String),
}

/// SQLite primary result codes treated as connection-level faults.
const SQLITE_IOERR: i32 = 10;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_NOTADB: i32 = 26;

/// Generic code reported when the driver gives none.
pub const SQLITE_ERROR: i32 = 1;

impl EngineError {
    /// Classify a driver error raised while running one statement.
    pub fn from_statement(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db) => {
                let code = error_code(&err);
                let message = db.message().to_string();
                match code & 0xff {
                    SQLITE_IOERR | SQLITE_CORRUPT | SQLITE_CANTOPEN | SQLITE_NOTADB => {
                        EngineError::Fatal(message)
                    }
                    _ => EngineError::Statement { code, message },
                }
            }
            sqlx::Error::Io(e) => EngineError::Fatal(e.to_string()),
            // Raised for caller mistakes such as named parameters
            sqlx::Error::Protocol(message) => EngineError::Statement {
                code: SQLITE_ERROR,
                message,
            },
            sqlx::Error::WorkerCrashed => EngineError::Fatal("sqlite worker crashed".to_string()),
            other => EngineError::Statement {
                code: SQLITE_ERROR,
                message: other.to_string(),
            },
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}

/// SQLite extended result code carried by a driver error, or `SQLITE_ERROR`.
pub fn error_code(err: &sqlx::Error) -> i32 {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|c| c.parse::<i32>().ok())
            .unwrap_or(SQLITE_ERROR),
        _ => SQLITE_ERROR,
    }
}
