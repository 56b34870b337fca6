//! Whole-database export and import.
//!
//! Two interchange formats over an open handle: a JSON document carrying
//! schema and row lists, and a plain SQL script of CREATE and INSERT
//! statements. The backup manager serializes through here; the same
//! helpers can seed the remote side of a sync pair.
//!
//! Table discovery reads the embedded engines' catalog; network-attached
//! handles are imported into, not exported from.

use crate::error::{Error, Result};
use crate::params::Params;
use crate::service::Storage;
use crate::types::{Row, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Current dump document layout version.
const DUMP_VERSION: u32 = 1;

/// Serialized contents of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDump {
    /// Table name.
    pub name: String,
    /// Verbatim CREATE statement from the catalog.
    pub create_sql: String,
    /// Column names in engine order.
    pub columns: Vec<String>,
    /// Row values in column order.
    pub rows: Vec<Vec<Value>>,
}

/// Serialized contents of a whole database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpDocument {
    /// Layout version.
    pub version: u32,
    /// Export instant.
    pub exported_at: DateTime<Utc>,
    /// Every user table, in name order.
    pub tables: Vec<TableDump>,
}

/// Exports every user table of `db` into a document.
///
/// # Errors
///
/// Returns an error if the catalog or a table cannot be read.
pub async fn export_document(db: &Storage) -> Result<DumpDocument> {
    let mut tables = Vec::new();
    for (name, create_sql) in list_tables(db).await? {
        let rows = db
            .all(&format!("SELECT * FROM \"{name}\""), &Params::Empty)
            .await?;
        let columns = rows
            .first()
            .map(|row| row.columns.clone())
            .unwrap_or_default();
        tables.push(TableDump {
            name,
            create_sql,
            columns,
            rows: rows.into_iter().map(|row| row.values).collect(),
        });
    }
    debug!(tables = tables.len(), "database exported");
    Ok(DumpDocument {
        version: DUMP_VERSION,
        exported_at: Utc::now(),
        tables,
    })
}

/// Imports a document into `db`, replacing any same-named tables. Rows of
/// each table are written inside one transaction.
///
/// # Errors
///
/// Returns an error if a table cannot be recreated or a row rejected.
pub async fn import_document(db: &Storage, document: &DumpDocument) -> Result<()> {
    if document.version != DUMP_VERSION {
        return Err(Error::config(format!(
            "unsupported dump version {}",
            document.version
        )));
    }
    for table in &document.tables {
        db.exec(&format!("DROP TABLE IF EXISTS \"{}\"", table.name))
            .await?;
        db.exec(&table.create_sql).await?;
        if table.rows.is_empty() {
            continue;
        }

        let quoted: Vec<String> = table.columns.iter().map(|c| format!("\"{c}\"")).collect();
        let markers: Vec<&str> = table.columns.iter().map(|_| "?").collect();
        let insert = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            table.name,
            quoted.join(", "),
            markers.join(", ")
        );

        let rows = table.rows.clone();
        let statement = insert.clone();
        db.transaction(|t| async move {
            for values in rows {
                t.run(&statement, &Params::Positional(values)).await?;
            }
            Ok(())
        })
        .await?;
    }
    debug!(tables = document.tables.len(), "database imported");
    Ok(())
}

/// Exports every user table of `db` as a SQL script.
///
/// # Errors
///
/// Returns an error if the catalog or a table cannot be read.
pub async fn export_script(db: &Storage) -> Result<String> {
    let mut script = String::new();
    for (name, create_sql) in list_tables(db).await? {
        script.push_str(&create_sql);
        script.push_str(";\n");
        let rows = db
            .all(&format!("SELECT * FROM \"{name}\""), &Params::Empty)
            .await?;
        for row in rows {
            script.push_str(&insert_literal(&name, &row));
            script.push_str(";\n");
        }
    }
    Ok(script)
}

/// Imports a SQL script into `db`.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub async fn import_script(db: &Storage, script: &str) -> Result<()> {
    db.exec(script).await
}

/// Reads the user tables and their CREATE statements from the catalog.
async fn list_tables(db: &Storage) -> Result<Vec<(String, String)>> {
    let rows = db
        .all(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &Params::Empty,
        )
        .await?;
    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        let name = row
            .get("name")
            .and_then(|v| v.as_text())
            .ok_or_else(|| Error::backend(db.kind(), "catalog row without a name"))?
            .to_string();
        let create_sql = row
            .get("sql")
            .and_then(|v| v.as_text())
            .ok_or_else(|| Error::backend(db.kind(), "catalog row without create sql"))?
            .to_string();
        tables.push((name, create_sql));
    }
    Ok(tables)
}

/// Renders one row as an INSERT statement with literal values.
fn insert_literal(table: &str, row: &Row) -> String {
    let quoted: Vec<String> = row.columns.iter().map(|c| format!("\"{c}\"")).collect();
    let values: Vec<String> = row.values.iter().map(sql_literal).collect();
    format!(
        "INSERT INTO \"{table}\" ({}) VALUES ({})",
        quoted.join(", "),
        values.join(", ")
    )
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => format!("{r:?}"),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Blob(b) => {
            let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
            format!("X'{hex}'")
        }
    }
}
