//! Core value and result types shared by every storage backend.

use serde::{Deserialize, Serialize};

/// SQL value that can be bound to or read from any backend.
///
/// Mirrors SQLite's storage classes, which form the least common
/// denominator across the supported engines. All variants are
/// JSON-serializable for dump documents and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL value
    Null,
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point number
    Real(f64),
    /// UTF-8 text string
    Text(String),
    /// Binary blob data
    Blob(Vec<u8>),
}

impl Value {
    /// Converts to a rusqlite value for parameter binding.
    pub(crate) fn to_rusqlite(&self) -> rusqlite::types::Value {
        match self {
            Self::Null => rusqlite::types::Value::Null,
            Self::Integer(i) => rusqlite::types::Value::Integer(*i),
            Self::Real(r) => rusqlite::types::Value::Real(*r),
            Self::Text(s) => rusqlite::types::Value::Text(s.clone()),
            Self::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
        }
    }

    /// The value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// True for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<rusqlite::types::ValueRef<'_>> for Value {
    fn from(value_ref: rusqlite::types::ValueRef<'_>) -> Self {
        match value_ref {
            rusqlite::types::ValueRef::Null => Self::Null,
            rusqlite::types::ValueRef::Integer(i) => Self::Integer(i),
            rusqlite::types::ValueRef::Real(r) => Self::Real(r),
            rusqlite::types::ValueRef::Text(t) => {
                Self::Text(String::from_utf8_lossy(t).to_string())
            }
            rusqlite::types::ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(rusqlite::types::ToSqlOutput::Owned(self.to_rusqlite()))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Self::Real(r)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Blob(b)
    }
}

/// A single row returned from a query.
///
/// Carries column names and their corresponding values in order.
/// Column order is insignificant once materialized; lookups go by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    /// Column names in order
    pub columns: Vec<String>,
    /// Values in the same order as columns
    pub values: Vec<Value>,
}

impl Row {
    /// Creates a new row with the given columns and values.
    ///
    /// # Panics
    ///
    /// Panics if `columns.len()` != `values.len()`.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Column count ({}) must match value count ({})",
            columns.len(),
            values.len()
        );
        Self { columns, values }
    }

    /// Gets a value by column name, returning None if not found.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Replaces the value of an existing column, returning whether it existed.
    pub fn set(&mut self, column: &str, value: Value) -> bool {
        match self.columns.iter().position(|c| c == column) {
            Some(idx) => {
                self.values[idx] = value;
                true
            }
            None => false,
        }
    }
}

/// Largest integer exactly representable by an IEEE 754 double.
///
/// Surrogate keys above this bound are carried as text so consumers that
/// round-trip through JSON never lose precision.
const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// Backend-assigned surrogate key of the last inserted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    /// Id within double precision, returned numerically.
    Integer(i64),
    /// Id beyond double precision, stringified.
    Text(String),
}

impl RowId {
    /// Normalizes an engine-reported 64-bit id.
    pub fn from_i64(id: i64) -> Self {
        if id.abs() > MAX_SAFE_INTEGER {
            Self::Text(id.to_string())
        } else {
            Self::Integer(id)
        }
    }
}

/// Outcome of a single mutating statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Rows affected by the last mutating statement.
    pub changes: u64,
    /// Surrogate key assigned by the engine, when applicable.
    pub last_insert_row_id: Option<RowId>,
}

impl RunResult {
    /// A result reporting no changes and no generated id.
    pub fn empty() -> Self {
        Self {
            changes: 0,
            last_insert_row_id: None,
        }
    }
}
