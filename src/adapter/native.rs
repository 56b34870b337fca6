//! Native file-backed embedded adapter.
//!
//! Drives a file-backed SQLite engine with a synchronous core; statements
//! execute on a blocking thread under the asynchronous façade. WAL is
//! enabled on open and the engine keeps a prepared-statement cache keyed
//! by statement text.

use super::engine;
use super::memory::run_batch;
use super::{
    AdapterContext, AdapterKind, AdapterState, BatchOp, BatchResult, StateCell, StorageAdapter,
    TxFlag,
};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::types::{Row, RunResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const LIMITATIONS: &[&str] = &["single writer per database file"];

const PREPARED_CACHE_CAPACITY: usize = 64;

/// Options for the native adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeOptions {
    /// Storage file. `:memory:` and `file:` URIs are passed through
    /// verbatim, bypassing path normalization.
    pub file_path: String,
    /// Open the database read-only.
    #[serde(default)]
    pub read_only: bool,
    /// How long the engine waits on a locked database.
    #[serde(default = "default_busy_timeout", with = "duration_millis")]
    pub busy_timeout: Duration,
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl NativeOptions {
    /// Options for a read-write database at `file_path`.
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            read_only: false,
            busy_timeout: default_busy_timeout(),
        }
    }

    fn is_special_path(&self) -> bool {
        self.file_path == ":memory:" || self.file_path.starts_with("file:")
    }
}

/// Native file-backed storage adapter.
pub struct NativeAdapter {
    state: StateCell,
    tx: TxFlag,
    options: NativeOptions,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl NativeAdapter {
    /// Creates a closed handle; call `open` before use.
    pub fn new(options: NativeOptions) -> Self {
        Self {
            state: StateCell::new(AdapterKind::Native),
            tx: TxFlag::new(AdapterKind::Native),
            options,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    fn open_engine(&self) -> Result<Connection> {
        let kind = AdapterKind::Native;

        if !self.options.is_special_path()
            && let Some(parent) = std::path::Path::new(&self.options.file_path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::open_failed(kind, e))?;
        }

        let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.options.read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = Connection::open_with_flags(&self.options.file_path, flags)
            .map_err(|e| Error::open_failed(kind, e))?;

        conn.busy_timeout(self.options.busy_timeout)
            .map_err(|e| Error::open_failed(kind, e))?;
        conn.set_prepared_statement_cache_capacity(PREPARED_CACHE_CAPACITY);

        if !self.options.read_only && self.options.file_path != ":memory:" {
            // journal_mode returns the new mode as a row; execute_batch
            // swallows it.
            conn.execute_batch("PRAGMA journal_mode = WAL;")
                .map_err(|e| Error::open_failed(kind, e))?;
        }

        Ok(conn)
    }

    /// Runs `f` against the engine on a blocking thread.
    async fn on_engine<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        self.state.ensure_open()?;
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard.as_ref().ok_or(Error::NotOpen {
                kind: AdapterKind::Native,
            })?;
            f(conn)
        })
        .await
        .map_err(|e| Error::backend(AdapterKind::Native, e))?
    }
}

#[async_trait]
impl StorageAdapter for NativeAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Native
    }

    fn state(&self) -> AdapterState {
        self.state.get()
    }

    fn context(&self) -> AdapterContext {
        AdapterContext {
            kind: AdapterKind::Native,
            capabilities: AdapterKind::Native.capabilities(),
            descriptor: self.options.file_path.clone(),
            limitations: LIMITATIONS,
        }
    }

    async fn open(&self) -> Result<()> {
        if !self.state.begin_open()? {
            return Ok(());
        }
        match self.open_engine() {
            Ok(conn) => {
                *self.conn.lock() = Some(conn);
                self.state.open_succeeded();
                info!(path = %self.options.file_path, "native adapter opened");
                Ok(())
            }
            Err(e) => {
                self.state.open_failed();
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.state.begin_close()? {
            return Ok(());
        }
        // Dropping the connection finalizes every cached statement.
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            conn.lock().take();
        })
        .await;
        self.tx.clear();
        match result {
            Ok(()) => {
                self.state.close_succeeded();
                debug!(path = %self.options.file_path, "native adapter closed");
                Ok(())
            }
            Err(e) => {
                self.state.close_failed();
                Err(Error::backend(AdapterKind::Native, e))
            }
        }
    }

    async fn run(&self, sql: &str, params: &Params) -> Result<RunResult> {
        let sql = sql.to_string();
        let params = params.clone();
        self.on_engine(move |conn| engine::run_on(AdapterKind::Native, conn, &sql, &params))
            .await
    }

    async fn all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.clone();
        self.on_engine(move |conn| engine::query_on(AdapterKind::Native, conn, &sql, &params))
            .await
    }

    async fn exec(&self, script: &str) -> Result<()> {
        let script = script.to_string();
        self.on_engine(move |conn| engine::exec_on(AdapterKind::Native, conn, &script))
            .await
    }

    async fn begin(&self) -> Result<()> {
        self.tx.try_begin()?;
        let result = self
            .on_engine(|conn| engine::exec_on(AdapterKind::Native, conn, "BEGIN"))
            .await;
        if result.is_err() {
            self.tx.clear();
        }
        result
    }

    async fn commit(&self) -> Result<()> {
        self.tx.ensure_active()?;
        self.on_engine(|conn| engine::exec_on(AdapterKind::Native, conn, "COMMIT"))
            .await?;
        self.tx.try_end()
    }

    async fn rollback(&self) -> Result<()> {
        self.tx.try_end()?;
        self.on_engine(|conn| engine::exec_on(AdapterKind::Native, conn, "ROLLBACK"))
            .await
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<BatchResult> {
        self.tx.try_begin()?;
        let result = self
            .on_engine(move |conn| Ok(run_batch(AdapterKind::Native, conn, &ops)))
            .await;
        self.tx.clear();
        result
    }

    async fn export_snapshot(&self) -> Result<Vec<u8>> {
        self.on_engine(|conn| {
            crate::snapshot::export_bytes(conn)
                .map_err(|e| Error::backend(AdapterKind::Native, e))
        })
        .await
    }
}
