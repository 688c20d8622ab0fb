//! Batch Engine Module
//!
//! Executes one batch of SQL operations, strictly in order, against a single
//! connection.
//!
//! # Error policy
//! - A statement error is captured into that operation's result and execution
//!   continues with the next operation.
//! - A fatal fault fails the current operation, cancels every later one, and
//!   marks the connection broken.
//! - The engine never wraps a batch in a transaction; callers that want
//!   atomicity put `BEGIN`/`COMMIT` in the batch themselves.

use crate::{
    BatchOperation, EngineError, Handle, OperationResult, Result, Row, SqlValue,
    error::{SQLITE_ERROR, error_code},
    registry::ConnectionRegistry,
};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Column, Executor, Row as _, SqliteConnection, Statement, TypeInfo, ValueRef};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Batch executor
///
/// Resolves handles through the registry and holds the connection's lock for
/// the duration of a batch, so batches on one handle never interleave.
pub struct BatchExecutor {
    registry: Arc<ConnectionRegistry>,
}

impl BatchExecutor {
    /// Creates a new batch executor
    ///
    /// # Arguments
    /// * `registry` - Shared connection registry used to resolve handles
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Execute `operations` in order against `handle`
    ///
    /// # Arguments
    /// * `handle` - Handle returned by `ConnectionRegistry::open`
    /// * `operations` - Statements to run, in order
    ///
    /// # Returns
    /// One `OperationResult` per operation, in input order.
    ///
    /// # Errors
    /// * `UnknownHandle` if the handle is not open (no partial results)
    /// * `Fatal` if an earlier batch left the connection broken
    pub async fn execute_batch(
        &self,
        handle: Handle,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<OperationResult>> {
        // Step 1: Resolve the handle; unknown handles fail with no results
        let connection = self.registry.lookup(handle).await?;
        let started = Instant::now();

        // Step 2: Take the connection's lock for the whole batch
        let mut storage = connection.lock().await;
        if let Some(reason) = &storage.broken {
            return Err(EngineError::Fatal(reason.clone()));
        }
        // Closed between lookup and lock
        let Some(conn) = storage.conn.as_mut() else {
            return Err(EngineError::UnknownHandle(handle));
        };

        // Step 3: Run every operation in order, one result each
        let mut results = Vec::with_capacity(operations.len());
        let mut fatal: Option<String> = None;

        for (index, op) in operations.iter().enumerate() {
            if let Some(reason) = &fatal {
                results.push(OperationResult::Cancelled {
                    reason: reason.clone(),
                });
                continue;
            }

            // The sqlite worker never returns from a statement containing NUL
            if op.sql.contains('\0') {
                debug!("Operation {} on connection {} rejected: NUL in SQL", index, handle);
                results.push(OperationResult::Failure {
                    code: SQLITE_ERROR,
                    message: "SQL text contains a NUL character".to_string(),
                });
                continue;
            }

            match run_operation(conn, op).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    let code = error_code(&err);
                    match EngineError::from_statement(err) {
                        EngineError::Fatal(message) => {
                            warn!(
                                "Fatal fault on connection {} at operation {}: {}",
                                handle, index, message
                            );
                            results.push(OperationResult::Failure {
                                code,
                                message: message.clone(),
                            });
                            fatal = Some(message);
                        }
                        EngineError::Statement { code, message } => {
                            debug!("Operation {} on connection {} failed: {}", index, handle, message);
                            results.push(OperationResult::Failure { code, message });
                        }
                        other => {
                            results.push(OperationResult::Failure {
                                code,
                                message: other.to_string(),
                            });
                        }
                    }
                }
            }
        }

        // Step 4: A fatal fault poisons the connection for later batches
        if let Some(reason) = fatal {
            storage.broken = Some(reason);
        }
        drop(storage);

        debug!(
            "Batch on connection {}: {} operations, {} failed, {} cancelled in {:?}",
            handle,
            results.len(),
            results
                .iter()
                .filter(|r| matches!(r, OperationResult::Failure { .. }))
                .count(),
            results.iter().filter(|r| r.is_cancelled()).count(),
            started.elapsed()
        );

        Ok(results)
    }
}

/// Run one statement: fetch rows when it has result columns, execute otherwise.
///
/// Row counts come from the `total_changes()` delta, since
/// `sqlite3_changes()` is stale after non-DML statements. This also covers
/// `INSERT ... RETURNING`, which reports both rows and a count.
async fn run_operation(
    conn: &mut SqliteConnection,
    op: &BatchOperation,
) -> std::result::Result<OperationResult, sqlx::Error> {
    let statement = (&mut *conn).prepare(op.sql.as_str()).await?;
    let has_columns = !statement.columns().is_empty();

    let mut query = statement.query();
    for param in &op.params {
        query = bind_value(query, param);
    }

    let before = total_changes(conn).await?;
    let (rows, done) = if has_columns {
        let fetched = query.fetch_all(&mut *conn).await?;
        let rows = fetched
            .iter()
            .map(decode_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        (Some(rows), None)
    } else {
        (None, Some(query.execute(&mut *conn).await?))
    };

    if total_changes(conn).await? == before {
        return Ok(OperationResult::Success {
            rows_affected: 0,
            insert_id: 0,
            rows,
        });
    }

    let (rows_affected, insert_id) = match done {
        Some(done) => (done.rows_affected(), done.last_insert_rowid()),
        // RETURNING statements go through fetch_all, which has no query result
        None => (changes(conn).await?, last_insert_rowid(conn).await?),
    };
    Ok(OperationResult::Success {
        rows_affected,
        insert_id,
        rows,
    })
}

async fn total_changes(conn: &mut SqliteConnection) -> std::result::Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT total_changes()")
        .fetch_one(&mut *conn)
        .await
}

async fn changes(conn: &mut SqliteConnection) -> std::result::Result<u64, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT changes()")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count.max(0) as u64)
}

async fn last_insert_rowid(conn: &mut SqliteConnection) -> std::result::Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT last_insert_rowid()")
        .fetch_one(&mut *conn)
        .await
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<i64>),
        SqlValue::Integer(i) => query.bind(*i),
        SqlValue::Real(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Blob(b) => query.bind(b.clone()),
    }
}

/// Decode by the value's storage class rather than the declared column type.
fn decode_row(row: &SqliteRow) -> std::result::Result<Row, sqlx::Error> {
    let mut columns = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let storage_class = raw.type_info().name().to_ascii_uppercase();
            match storage_class.as_str() {
                "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" | "NUMERIC" => SqlValue::Real(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        columns.push((column.name().to_string(), value));
    }
    Ok(Row { columns })
}
