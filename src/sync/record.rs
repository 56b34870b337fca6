//! Synchronized record extraction and upsert statement building.
//!
//! Every replicated row must carry a stable `id` and a comparable
//! `updated_at`. Rows lacking either are rejected with a diagnostic so
//! nothing is silently dropped.

use crate::error::{Error, Result};
use crate::params::Params;
use crate::types::{Row, Value};
use chrono::DateTime;

/// Column holding the stable record identifier.
pub const ID_COLUMN: &str = "id";

/// Column holding the record's update instant.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Comparable update instant, normalized to epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncStamp(i64);

impl SyncStamp {
    /// Normalizes a column value: integers and reals are taken as epoch
    /// milliseconds, text is parsed as RFC 3339.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(ms) => Some(Self(*ms)),
            Value::Real(ms) => Some(Self(*ms as i64)),
            Value::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| Self(dt.timestamp_millis())),
            _ => None,
        }
    }

    /// Epoch milliseconds.
    pub fn millis(self) -> i64 {
        self.0
    }
}

/// One replicated row with its extracted key and stamp.
#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub id: String,
    pub updated_at: SyncStamp,
    pub row: Row,
}

impl SyncRecord {
    /// Extracts the record shape from a raw row.
    ///
    /// # Errors
    ///
    /// Returns `MissingColumn` when `id` or `updated_at` is absent, null,
    /// or not expressible as a key/instant.
    pub fn extract(table: &str, row: Row) -> Result<Self> {
        let id = match row.get(ID_COLUMN) {
            Some(Value::Text(id)) => id.clone(),
            Some(Value::Integer(id)) => id.to_string(),
            _ => {
                return Err(Error::MissingColumn {
                    table: table.to_string(),
                    column: ID_COLUMN.to_string(),
                });
            }
        };
        let updated_at = row
            .get(UPDATED_AT_COLUMN)
            .and_then(SyncStamp::from_value)
            .ok_or_else(|| Error::MissingColumn {
                table: table.to_string(),
                column: UPDATED_AT_COLUMN.to_string(),
            })?;
        Ok(Self {
            id,
            updated_at,
            row,
        })
    }

    /// A copy of this record under a different id.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        let id = id.into();
        let mut row = self.row.clone();
        row.set(ID_COLUMN, Value::Text(id.clone()));
        Self {
            id,
            updated_at: self.updated_at,
            row,
        }
    }
}

/// Builds an upsert for `row` keyed on `id`.
///
/// The `ON CONFLICT (id) DO UPDATE SET c = excluded.c` form is understood
/// by both the embedded engines and the network dialect, so one statement
/// serves either side of a sync pair.
pub fn upsert(table: &str, row: &Row) -> (String, Params) {
    let quoted: Vec<String> = row.columns.iter().map(|c| format!("\"{c}\"")).collect();
    let markers: Vec<&str> = row.columns.iter().map(|_| "?").collect();
    let updates: Vec<String> = row
        .columns
        .iter()
        .filter(|c| c.as_str() != ID_COLUMN)
        .map(|c| format!("\"{c}\" = excluded.\"{c}\""))
        .collect();

    let conflict_clause = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    let sql = format!(
        "INSERT INTO \"{table}\" ({}) VALUES ({}) ON CONFLICT (\"{ID_COLUMN}\") {conflict_clause}",
        quoted.join(", "),
        markers.join(", "),
    );
    (sql, Params::Positional(row.values.clone()))
}
