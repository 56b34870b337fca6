//! Single-task embedded adapter for constrained hosts.
//!
//! Models a WASM-compiled SQL runtime: the whole database lives in one
//! in-memory engine driven by a single task, and durability (when a file
//! path is configured and the host exposes a filesystem) comes from
//! writing the engine's export bytes back to the file after every
//! mutation and before close.

use super::engine;
use super::{
    AdapterContext, AdapterKind, AdapterState, StateCell, StorageAdapter, TxFlag,
};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::snapshot;
use crate::types::{Row, RunResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

const LIMITATIONS: &[&str] = &[
    "single outstanding operation per handle",
    "whole database is rewritten on each persisted mutation",
];

/// Options for the wasm adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WasmOptions {
    /// When set, the engine is seeded from this file on open and export
    /// bytes are written back after each mutation. Absent means purely
    /// in-memory.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl WasmOptions {
    /// Options persisting to `file_path`.
    pub fn persistent(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(file_path.into()),
        }
    }
}

/// Single-task embedded storage adapter.
pub struct WasmAdapter {
    state: StateCell,
    tx: TxFlag,
    options: WasmOptions,
    conn: Mutex<Option<Connection>>,
    /// Mutations happened inside the active transaction; flushed on commit.
    tx_dirty: AtomicBool,
}

impl WasmAdapter {
    /// Creates a closed handle; call `open` before use.
    pub fn new(options: WasmOptions) -> Self {
        Self {
            state: StateCell::new(AdapterKind::Wasm),
            tx: TxFlag::new(AdapterKind::Wasm),
            options,
            conn: Mutex::new(None),
            tx_dirty: AtomicBool::new(false),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.state.ensure_open()?;
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(Error::NotOpen {
            kind: AdapterKind::Wasm,
        })?;
        f(conn)
    }

    /// Writes export bytes to the configured file, if any.
    ///
    /// Inside a transaction the write is deferred to commit so the file
    /// only ever holds committed state.
    fn persist_after_mutation(&self) -> Result<()> {
        let Some(path) = &self.options.file_path else {
            return Ok(());
        };
        if self.tx.is_active() {
            self.tx_dirty.store(true, Ordering::Release);
            return Ok(());
        }
        self.with_conn(|conn| {
            snapshot::export_to_file(conn, path).map_err(|e| Error::backend(AdapterKind::Wasm, e))
        })
    }
}

#[async_trait]
impl StorageAdapter for WasmAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Wasm
    }

    fn state(&self) -> AdapterState {
        self.state.get()
    }

    fn context(&self) -> AdapterContext {
        let mut capabilities = AdapterKind::Wasm.capabilities();
        if self.options.file_path.is_some() {
            capabilities |= crate::capability::CapabilitySet::PERSISTENCE;
        }
        AdapterContext {
            kind: AdapterKind::Wasm,
            capabilities,
            descriptor: self
                .options
                .file_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string()),
            limitations: LIMITATIONS,
        }
    }

    fn capabilities(&self) -> crate::capability::CapabilitySet {
        self.context().capabilities
    }

    async fn open(&self) -> Result<()> {
        if !self.state.begin_open()? {
            return Ok(());
        }
        let opened = match &self.options.file_path {
            Some(path) => snapshot::import_from_file(path)
                .map_err(|e| Error::open_failed(AdapterKind::Wasm, e)),
            None => Connection::open_in_memory()
                .map_err(|e| Error::open_failed(AdapterKind::Wasm, e)),
        };
        match opened {
            Ok(conn) => {
                *self.conn.lock() = Some(conn);
                self.state.open_succeeded();
                info!(
                    persistent = self.options.file_path.is_some(),
                    "wasm adapter opened"
                );
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
        if let Some(path) = &self.options.file_path {
            let flush = {
                let guard = self.conn.lock();
                match guard.as_ref() {
                    Some(conn) => snapshot::export_to_file(conn, path),
                    None => Ok(()),
                }
            };
            if let Err(e) = flush {
                self.state.close_failed();
                return Err(Error::backend(AdapterKind::Wasm, e));
            }
        }
        self.conn.lock().take();
        self.tx.clear();
        self.tx_dirty.store(false, Ordering::Release);
        self.state.close_succeeded();
        debug!("wasm adapter closed");
        Ok(())
    }

    async fn run(&self, sql: &str, params: &Params) -> Result<RunResult> {
        let result = self.with_conn(|conn| engine::run_on(AdapterKind::Wasm, conn, sql, params))?;
        self.persist_after_mutation()?;
        Ok(result)
    }

    async fn all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.with_conn(|conn| engine::query_on(AdapterKind::Wasm, conn, sql, params))
    }

    async fn exec(&self, script: &str) -> Result<()> {
        self.with_conn(|conn| engine::exec_on(AdapterKind::Wasm, conn, script))?;
        self.persist_after_mutation()
    }

    async fn begin(&self) -> Result<()> {
        self.tx.try_begin()?;
        let result = self.with_conn(|conn| engine::exec_on(AdapterKind::Wasm, conn, "BEGIN"));
        if result.is_err() {
            self.tx.clear();
        }
        result
    }

    async fn commit(&self) -> Result<()> {
        self.tx.ensure_active()?;
        self.with_conn(|conn| engine::exec_on(AdapterKind::Wasm, conn, "COMMIT"))?;
        self.tx.try_end()?;
        if self.tx_dirty.swap(false, Ordering::AcqRel) {
            self.persist_after_mutation()?;
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.tx.try_end()?;
        self.tx_dirty.store(false, Ordering::Release);
        self.with_conn(|conn| engine::exec_on(AdapterKind::Wasm, conn, "ROLLBACK"))
    }

    async fn export_snapshot(&self) -> Result<Vec<u8>> {
        self.with_conn(|conn| {
            snapshot::export_bytes(conn).map_err(|e| Error::backend(AdapterKind::Wasm, e))
        })
    }

    async fn import_snapshot(&self, bytes: Vec<u8>) -> Result<()> {
        self.state.ensure_open()?;
        let conn =
            snapshot::import_bytes(&bytes).map_err(|e| Error::backend(AdapterKind::Wasm, e))?;
        *self.conn.lock() = Some(conn);
        self.persist_after_mutation()
    }
}
