//! Plain in-memory adapter, no persistence.
//!
//! The simplest backend: one in-process engine living entirely in memory.
//! Useful for tests, scratch work, and as the remote side of a sync pair
//! in unit scenarios.

use super::engine;
use super::{
    AdapterContext, AdapterKind, AdapterState, BatchError, BatchOp, BatchResult, StateCell,
    StorageAdapter, TxFlag,
};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::types::{Row, RunResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, warn};

const LIMITATIONS: &[&str] = &["data is lost when the handle closes"];

/// In-memory storage adapter.
pub struct MemoryAdapter {
    state: StateCell,
    tx: TxFlag,
    conn: Mutex<Option<Connection>>,
}

impl MemoryAdapter {
    /// Creates a closed handle; call `open` before use.
    pub fn new() -> Self {
        Self {
            state: StateCell::new(AdapterKind::Memory),
            tx: TxFlag::new(AdapterKind::Memory),
            conn: Mutex::new(None),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.state.ensure_open()?;
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(Error::NotOpen {
            kind: AdapterKind::Memory,
        })?;
        f(conn)
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Memory
    }

    fn state(&self) -> AdapterState {
        self.state.get()
    }

    fn context(&self) -> AdapterContext {
        AdapterContext {
            kind: AdapterKind::Memory,
            capabilities: AdapterKind::Memory.capabilities(),
            descriptor: ":memory:".to_string(),
            limitations: LIMITATIONS,
        }
    }

    async fn open(&self) -> Result<()> {
        if !self.state.begin_open()? {
            return Ok(());
        }
        match Connection::open_in_memory() {
            Ok(conn) => {
                *self.conn.lock() = Some(conn);
                self.state.open_succeeded();
                debug!(kind = %AdapterKind::Memory, "adapter opened");
                Ok(())
            }
            Err(e) => {
                self.state.open_failed();
                Err(Error::open_failed(AdapterKind::Memory, e))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.state.begin_close()? {
            return Ok(());
        }
        self.conn.lock().take();
        self.tx.clear();
        self.state.close_succeeded();
        debug!(kind = %AdapterKind::Memory, "adapter closed");
        Ok(())
    }

    async fn run(&self, sql: &str, params: &Params) -> Result<RunResult> {
        self.with_conn(|conn| engine::run_on(AdapterKind::Memory, conn, sql, params))
    }

    async fn all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.with_conn(|conn| engine::query_on(AdapterKind::Memory, conn, sql, params))
    }

    async fn exec(&self, script: &str) -> Result<()> {
        self.with_conn(|conn| engine::exec_on(AdapterKind::Memory, conn, script))
    }

    async fn begin(&self) -> Result<()> {
        self.tx.try_begin()?;
        let result = self.with_conn(|conn| engine::exec_on(AdapterKind::Memory, conn, "BEGIN"));
        if result.is_err() {
            self.tx.clear();
        }
        result
    }

    async fn commit(&self) -> Result<()> {
        self.tx.ensure_active()?;
        self.with_conn(|conn| engine::exec_on(AdapterKind::Memory, conn, "COMMIT"))?;
        self.tx.try_end()
    }

    async fn rollback(&self) -> Result<()> {
        self.tx.try_end()?;
        self.with_conn(|conn| engine::exec_on(AdapterKind::Memory, conn, "ROLLBACK"))
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<BatchResult> {
        self.tx.try_begin()?;
        let result = self.with_conn(|conn| Ok(run_batch(AdapterKind::Memory, conn, &ops)));
        self.tx.clear();
        result
    }

    async fn export_snapshot(&self) -> Result<Vec<u8>> {
        self.with_conn(|conn| {
            crate::snapshot::export_bytes(conn)
                .map_err(|e| Error::backend(AdapterKind::Memory, e))
        })
    }

    async fn import_snapshot(&self, bytes: Vec<u8>) -> Result<()> {
        self.state.ensure_open()?;
        let conn = crate::snapshot::import_bytes(&bytes)
            .map_err(|e| Error::backend(AdapterKind::Memory, e))?;
        *self.conn.lock() = Some(conn);
        Ok(())
    }
}

/// Runs a batch inside one implicit transaction.
///
/// Per-operation failures are recorded against their index and the
/// enclosing transaction still commits; a failing BEGIN or COMMIT is
/// catastrophic and reports every operation failed after rolling back.
pub(super) fn run_batch(kind: AdapterKind, conn: &Connection, ops: &[BatchOp]) -> BatchResult {
    let mut result = BatchResult::default();

    if let Err(e) = conn.execute_batch("BEGIN") {
        return all_failed(ops.len(), e.to_string());
    }

    for (index, op) in ops.iter().enumerate() {
        match engine::run_on(kind, conn, &op.sql, &op.params) {
            Ok(run) => {
                result.successful += 1;
                result.results.push(Some(run));
            }
            Err(e) => {
                warn!(kind = %kind, index, error = %e, "batch operation failed");
                result.failed += 1;
                result.results.push(None);
                result.errors.push(BatchError {
                    index,
                    message: e.to_string(),
                });
            }
        }
    }

    if let Err(e) = conn.execute_batch("COMMIT") {
        let _ = conn.execute_batch("ROLLBACK");
        return all_failed(ops.len(), e.to_string());
    }

    result
}

fn all_failed(count: usize, message: String) -> BatchResult {
    BatchResult {
        successful: 0,
        failed: count,
        results: vec![None; count],
        errors: (0..count)
            .map(|index| BatchError {
                index,
                message: message.clone(),
            })
            .collect(),
    }
}
