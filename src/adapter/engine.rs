//! Shared statement execution over an embedded SQLite engine.
//!
//! The native, wasm, blob and memory adapters all drive rusqlite; the
//! binding and row-materialization logic lives here once. Statements go
//! through the engine's prepared-statement cache, keyed by statement text.

use super::AdapterKind;
use crate::error::{Error, Result};
use crate::params::Params;
use crate::types::{Row, RowId, RunResult, Value};
use rusqlite::Connection;

/// Binds a parameter bundle onto a prepared statement.
///
/// Positional bundles must cover every `?` marker exactly; named bundles
/// are resolved marker-by-marker so unreferenced names are simply unused.
fn bind(kind: AdapterKind, stmt: &mut rusqlite::Statement<'_>, params: &Params) -> Result<()> {
    let marker_count = stmt.parameter_count();
    match params {
        Params::Empty => {
            if marker_count > 0 {
                return Err(Error::bind("?1"));
            }
        }
        Params::Positional(values) => {
            if values.len() != marker_count {
                let missing = values.len().min(marker_count) + 1;
                return Err(Error::bind(format!("?{missing}")));
            }
            for (i, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, value)
                    .map_err(|e| Error::backend(kind, e))?;
            }
        }
        Params::Named(_) => {
            for index in 1..=marker_count {
                let Some(marker) = stmt.parameter_name(index) else {
                    return Err(Error::bind(format!("?{index}")));
                };
                let name = marker.trim_start_matches(['@', ':', '$']);
                let Some(value) = params.lookup(name) else {
                    return Err(Error::bind(marker.to_string()));
                };
                stmt.raw_bind_parameter(index, value)
                    .map_err(|e| Error::backend(kind, e))?;
            }
        }
    }
    Ok(())
}

/// Executes a mutating statement, reporting changes and any new rowid.
///
/// The engine always tracks a last-insert rowid; it is reported only when
/// this statement actually advanced it, so updates and deletes yield
/// `None`.
pub(super) fn run_on(
    kind: AdapterKind,
    conn: &Connection,
    sql: &str,
    params: &Params,
) -> Result<RunResult> {
    let rowid_before = conn.last_insert_rowid();
    let changes = {
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| Error::backend(kind, e))?;
        bind(kind, &mut stmt, params)?;
        stmt.raw_execute().map_err(|e| Error::backend(kind, e))?
    };
    let rowid_after = conn.last_insert_rowid();

    let last_insert_row_id = if rowid_after != rowid_before {
        Some(RowId::from_i64(rowid_after))
    } else {
        None
    };

    Ok(RunResult {
        changes: changes as u64,
        last_insert_row_id,
    })
}

/// Executes a query and materializes every row.
pub(super) fn query_on(
    kind: AdapterKind,
    conn: &Connection,
    sql: &str,
    params: &Params,
) -> Result<Vec<Row>> {
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| Error::backend(kind, e))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    bind(kind, &mut stmt, params)?;

    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    loop {
        match rows.next() {
            Ok(Some(row)) => {
                let mut values = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    let value_ref = row.get_ref(i).map_err(|e| Error::backend(kind, e))?;
                    values.push(Value::from(value_ref));
                }
                out.push(Row::new(columns.clone(), values));
            }
            Ok(None) => break,
            Err(e) => return Err(Error::backend(kind, e)),
        }
    }
    Ok(out)
}

/// Executes a multi-statement script with no result set.
pub(super) fn exec_on(kind: AdapterKind, conn: &Connection, script: &str) -> Result<()> {
    conn.execute_batch(script)
        .map_err(|e| Error::backend(kind, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY, v INTEGER)")
            .unwrap();
        conn
    }

    #[test]
    fn run_reports_changes_and_rowid() {
        let conn = engine();
        let result = run_on(
            AdapterKind::Memory,
            &conn,
            "INSERT INTO t VALUES (?, ?)",
            &Params::positional(vec![Value::Text("a".into()), Value::Integer(1)]),
        )
        .unwrap();
        assert_eq!(result.changes, 1);
        assert_eq!(result.last_insert_row_id, Some(RowId::Integer(1)));
    }

    #[test]
    fn update_yields_no_rowid() {
        let conn = engine();
        run_on(
            AdapterKind::Memory,
            &conn,
            "INSERT INTO t VALUES ('a', 1)",
            &Params::Empty,
        )
        .unwrap();
        let result = run_on(
            AdapterKind::Memory,
            &conn,
            "UPDATE t SET v = 2 WHERE k = 'a'",
            &Params::Empty,
        )
        .unwrap();
        assert_eq!(result.changes, 1);
        assert_eq!(result.last_insert_row_id, None);
    }

    #[test]
    fn named_markers_bind_through_lookup() {
        let conn = engine();
        run_on(
            AdapterKind::Memory,
            &conn,
            "INSERT INTO t VALUES (@k, @v)",
            &Params::named(vec![
                ("k", Value::Text("a".into())),
                ("v", Value::Integer(9)),
            ]),
        )
        .unwrap();

        let rows = query_on(
            AdapterKind::Memory,
            &conn,
            "SELECT v FROM t WHERE k = @k",
            &Params::named(vec![("k", Value::Text("a".into()))]),
        )
        .unwrap();
        assert_eq!(rows[0].get("v"), Some(&Value::Integer(9)));
    }

    #[test]
    fn missing_named_value_is_a_bind_error() {
        let conn = engine();
        let err = run_on(
            AdapterKind::Memory,
            &conn,
            "INSERT INTO t VALUES (@k, @v)",
            &Params::named(vec![("k", Value::Text("a".into()))]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Bind { ref marker } if marker == "@v"));
    }

    #[test]
    fn positional_arity_mismatch_is_a_bind_error() {
        let conn = engine();
        let err = run_on(
            AdapterKind::Memory,
            &conn,
            "INSERT INTO t VALUES (?, ?)",
            &Params::single("a"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Bind { ref marker } if marker == "?2"));
    }

    #[test]
    fn null_values_roundtrip() {
        let conn = engine();
        run_on(
            AdapterKind::Memory,
            &conn,
            "INSERT INTO t VALUES (?, ?)",
            &Params::positional(vec![Value::Text("a".into()), Value::Null]),
        )
        .unwrap();
        let rows = query_on(
            AdapterKind::Memory,
            &conn,
            "SELECT v FROM t",
            &Params::Empty,
        )
        .unwrap();
        assert_eq!(rows[0].get("v"), Some(&Value::Null));
    }
}
