//! Result Encoder
//!
//! Pure functions from `OperationResult` to JSON. One output entry per input
//! entry, same order.
//!
//! # Reply shape
//! - success: `{"ok": true}` plus `rowsAffected`/`insertId` when the statement
//!   changed rows, plus `rows` when it produced result columns
//! - failure: `{"ok": false, "error": "...", "code": n}`
//! - cancelled: `{"ok": false, "error": "cancelled: ...", "cancelled": true}`

use crate::{OperationResult, Row, SqlValue};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};

/// Encode a whole batch
pub fn encode(results: &[OperationResult]) -> Value {
    Value::Array(results.iter().map(encode_result).collect())
}

pub fn encode_result(result: &OperationResult) -> Value {
    match result {
        OperationResult::Success {
            rows_affected,
            insert_id,
            rows,
        } => {
            let mut entry = Map::new();
            entry.insert("ok".to_string(), Value::Bool(true));
            if *rows_affected > 0 {
                entry.insert("rowsAffected".to_string(), json!(rows_affected));
                entry.insert("insertId".to_string(), json!(insert_id));
            }
            if let Some(rows) = rows {
                entry.insert(
                    "rows".to_string(),
                    Value::Array(rows.iter().map(encode_row).collect()),
                );
            }
            Value::Object(entry)
        }
        OperationResult::Failure { code, message } => json!({
            "ok": false,
            "error": message,
            "code": code,
        }),
        OperationResult::Cancelled { reason } => json!({
            "ok": false,
            "error": format!("cancelled: {}", reason),
            "cancelled": true,
        }),
    }
}

/// Row as a JSON object keyed by column name
///
/// Duplicate column names keep the last value, as a JS object would.
pub fn encode_row(row: &Row) -> Value {
    let mut object = Map::with_capacity(row.columns.len());
    for (name, value) in &row.columns {
        object.insert(name.clone(), encode_value(value));
    }
    Value::Object(object)
}

pub fn encode_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => json!(i),
        // NaN and infinities have no JSON form
        SqlValue::Real(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(b) => Value::String(STANDARD.encode(b)),
    }
}
