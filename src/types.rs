use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque identifier of a live connection, analogous to a file descriptor.
pub type Handle = u64;

/// Open flags, bit-compatible with `sqlite3_open_v2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenFlags(u32);

bitflags! {
    impl OpenFlags: u32 {
        const READ_ONLY = 0x01;
        const READ_WRITE = 0x02;
        const CREATE_IF_MISSING = 0x04;
        const IN_MEMORY = 0x80;
    }
}

impl OpenFlags {
    /// Check that the combination makes sense before touching storage.
    pub fn validate(self) -> Result<(), String> {
        if OpenFlags::from_bits(self.bits()).is_none() {
            return Err(format!(
                "unsupported open flags: {:#x}",
                self.bits() & !OpenFlags::all().bits()
            ));
        }
        if self.contains(Self::READ_ONLY)
            && self.intersects(Self::CREATE_IF_MISSING | Self::READ_WRITE)
        {
            return Err("READ_ONLY cannot be combined with READ_WRITE or CREATE_IF_MISSING".to_string());
        }
        Ok(())
    }
}

/// A scalar that can be bound to a statement or read out of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&Value> for SqlValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else {
                    SqlValue::Real(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            // Nested structures are stored as their JSON text
            other => SqlValue::Text(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for SqlValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(SqlValue::from(&value))
    }
}

/// One SQL statement with its positional parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchOperation {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<SqlValue>,
}

impl BatchOperation {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A result row: column names paired with values, in select-list order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Outcome of a single operation within a batch
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Success {
        rows_affected: u64,
        insert_id: i64,
        /// Present when the statement produced result columns
        rows: Option<Vec<Row>>,
    },
    Failure {
        code: i32,
        message: String,
    },
    /// Never executed because an earlier operation hit a fatal fault.
    Cancelled {
        reason: String,
    },
}

impl OperationResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, OperationResult::Success { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationResult::Cancelled { .. })
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationResult::Success { rows_affected, rows, .. } => match rows {
                Some(rows) => write!(f, "ok ({} rows)", rows.len()),
                None => write!(f, "ok ({} affected)", rows_affected),
            },
            OperationResult::Failure { code, message } => write!(f, "error {}: {}", code, message),
            OperationResult::Cancelled { reason } => write!(f, "cancelled: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_are_plain_integers_on_the_wire() {
        let flags: OpenFlags = serde_json::from_value(serde_json::json!(6)).unwrap();
        assert_eq!(flags, OpenFlags::READ_WRITE | OpenFlags::CREATE_IF_MISSING);
        assert_eq!(serde_json::to_value(OpenFlags::IN_MEMORY).unwrap(), serde_json::json!(128));
    }

    #[test]
    fn test_open_flags_validation() {
        assert!(OpenFlags::empty().validate().is_ok());
        assert!((OpenFlags::READ_WRITE | OpenFlags::CREATE_IF_MISSING).validate().is_ok());
        assert!((OpenFlags::READ_ONLY | OpenFlags::READ_WRITE).validate().is_err());

        let unknown = OpenFlags::from_bits_retain(0x1000 | 0x02);
        let err = unknown.validate().unwrap_err();
        assert!(err.contains("0x1000"), "{}", err);
    }
}
