//! Whole-database snapshot serialization for in-memory engines.
//!
//! The blob-persisted and wasm adapters hold their entire database in an
//! in-memory SQLite engine. Converting that engine to and from a byte
//! sequence goes through the SQLite online backup API against a scratch
//! file: the resulting bytes are a complete, valid database image at some
//! committed point.

use anyhow::{Context, Result};
use rusqlite::{Connection, DatabaseName};

/// Serializes the full state of `conn` into a database image.
///
/// # Errors
///
/// Returns an error if the scratch file cannot be created or the backup
/// fails mid-copy.
pub fn export_bytes(conn: &Connection) -> Result<Vec<u8>> {
    let scratch = tempfile::NamedTempFile::new().context("Failed to create scratch file")?;
    conn.backup(DatabaseName::Main, scratch.path(), None)
        .context("Failed to back up database to scratch file")?;
    let bytes = std::fs::read(scratch.path()).context("Failed to read scratch file")?;
    Ok(bytes)
}

/// Restores a database image into a fresh in-memory engine.
///
/// An empty image yields an empty engine, which is what a first open
/// against a store with no snapshot looks like.
///
/// # Errors
///
/// Returns an error if the bytes are not a valid database image or the
/// scratch file cannot be written.
pub fn import_bytes(bytes: &[u8]) -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("Failed to open in-memory engine")?;
    if bytes.is_empty() {
        return Ok(conn);
    }

    let scratch = tempfile::NamedTempFile::new().context("Failed to create scratch file")?;
    std::fs::write(scratch.path(), bytes).context("Failed to write scratch file")?;
    conn.restore(
        DatabaseName::Main,
        scratch.path(),
        None::<fn(rusqlite::backup::Progress)>,
    )
    .context("Failed to restore database from scratch file")?;
    Ok(conn)
}

/// Writes the full state of `conn` to a database file, creating the
/// parent directory if missing.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the backup
/// fails.
pub fn export_to_file(conn: &Connection, path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    conn.backup(DatabaseName::Main, path, None)
        .with_context(|| format!("Failed to back up database to {}", path.display()))
}

/// Loads a database file into a fresh in-memory engine.
///
/// A missing file yields an empty engine.
///
/// # Errors
///
/// Returns an error if the file exists but is not a valid database image.
pub fn import_from_file(path: &std::path::Path) -> Result<Connection> {
    if !path.exists() {
        return Connection::open_in_memory().context("Failed to open in-memory engine");
    }
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    import_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_engine() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (k TEXT PRIMARY KEY, v INTEGER);
             INSERT INTO t VALUES ('a', 1), ('b', 2);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn export_import_preserves_rows() {
        let conn = seeded_engine();
        let bytes = export_bytes(&conn).unwrap();
        assert!(!bytes.is_empty());

        let restored = import_bytes(&bytes).unwrap();
        let count: i64 = restored
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn empty_bytes_yield_empty_engine() {
        let conn = import_bytes(&[]).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn file_roundtrip_creates_missing_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/db.sqlite");

        let conn = seeded_engine();
        export_to_file(&conn, &path).unwrap();
        assert!(path.exists());

        let restored = import_from_file(&path).unwrap();
        let v: i64 = restored
            .query_row("SELECT v FROM t WHERE k='b'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(v, 2);
    }

    #[test]
    fn missing_file_yields_empty_engine() {
        let tmp = tempfile::TempDir::new().unwrap();
        let conn = import_from_file(&tmp.path().join("absent.sqlite")).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }
}
