//! Blob-persisted in-process engine.
//!
//! Composes an in-memory SQL engine with an asynchronous key-value store:
//! the engine's full serialized state lives under the key `"db"` in a
//! single named collection. Mutations set a dirty flag; the first mutation
//! of a batching window is written through immediately, later ones are
//! picked up by a periodic saver task. `close` flushes whatever is still
//! dirty, so the stored blob always reflects every committed write.
//!
//! Because a single-key put is atomic in the KV store, the stored blob is
//! always a valid database image at some committed point; torn snapshots
//! cannot be observed.

use super::engine;
use super::{
    AdapterContext, AdapterKind, AdapterState, StateCell, StorageAdapter, TxFlag,
};
use crate::error::{Error, Result};
use crate::kv::KvStore;
use crate::params::Params;
use crate::snapshot;
use crate::types::{Row, RunResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Key the serialized database lives under.
const SNAPSHOT_KEY: &str = "db";

const LIMITATIONS: &[&str] = &[
    "durability lags committed writes by at most one save interval",
    "whole database is rewritten on each persistence tick",
];

/// Options for the blob-persisted engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobOptions {
    /// Identifier of the KV database; the store file is derived from it.
    pub db_name: String,
    /// Name of the object collection holding the snapshot.
    #[serde(default = "default_store_name")]
    pub store_name: String,
    /// Persist dirty state automatically.
    #[serde(default = "default_auto_save")]
    pub auto_save: bool,
    /// Interval between persistence ticks, in milliseconds.
    #[serde(default = "default_save_interval", with = "interval_millis")]
    pub save_interval: Duration,
    /// Directory the KV database file lives in. Defaults to the current
    /// directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_store_name() -> String {
    "kv".to_string()
}

fn default_auto_save() -> bool {
    true
}

fn default_save_interval() -> Duration {
    Duration::from_secs(5)
}

mod interval_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl BlobOptions {
    /// Options for a store named `db_name` with defaults.
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            store_name: default_store_name(),
            auto_save: default_auto_save(),
            save_interval: default_save_interval(),
            directory: None,
        }
    }

    /// Places the KV database file under `directory`.
    pub fn in_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Overrides the persistence tick interval.
    pub fn save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    /// Disables automatic persistence; only `close` flushes.
    pub fn manual_save(mut self) -> Self {
        self.auto_save = false;
        self
    }

    fn store_path(&self) -> PathBuf {
        let file = format!("{}.redb", self.db_name);
        match &self.directory {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        }
    }
}

/// Engine state shared with the saver task.
struct BlobInner {
    conn: Mutex<Option<Connection>>,
    kv: Mutex<Option<KvStore>>,
    /// Committed writes not yet persisted.
    dirty: AtomicBool,
    /// A persistence is already scheduled for the next tick.
    tick_pending: AtomicBool,
}

impl BlobInner {
    fn export(&self) -> Result<Vec<u8>> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(Error::NotOpen {
            kind: AdapterKind::Blob,
        })?;
        snapshot::export_bytes(conn).map_err(|e| Error::backend(AdapterKind::Blob, e))
    }

    fn kv(&self) -> Result<KvStore> {
        self.kv.lock().clone().ok_or(Error::NotOpen {
            kind: AdapterKind::Blob,
        })
    }

    /// Exports the engine and writes the snapshot. Clears the dirty flag
    /// only after the put commits.
    async fn persist(&self) -> Result<()> {
        let bytes = self.export()?;
        let kv = self.kv()?;
        kv.put(SNAPSHOT_KEY, bytes)
            .await
            .map_err(|e| Error::backend(AdapterKind::Blob, e))?;
        self.dirty.store(false, Ordering::Release);
        debug!("snapshot persisted");
        Ok(())
    }

    /// Persists when dirty; used by the saver tick.
    async fn persist_if_dirty(&self) -> Result<()> {
        if self.dirty.load(Ordering::Acquire) {
            self.persist().await?;
        }
        Ok(())
    }
}

/// Blob-persisted storage adapter.
pub struct BlobAdapter {
    state: StateCell,
    tx: TxFlag,
    options: BlobOptions,
    inner: Arc<BlobInner>,
    saver: Mutex<Option<JoinHandle<()>>>,
    /// Test seam: a pre-built store takes the place of the file-backed one.
    injected_store: Mutex<Option<KvStore>>,
}

impl BlobAdapter {
    /// Creates a closed handle; call `open` before use.
    pub fn new(options: BlobOptions) -> Self {
        Self {
            state: StateCell::new(AdapterKind::Blob),
            tx: TxFlag::new(AdapterKind::Blob),
            options,
            inner: Arc::new(BlobInner {
                conn: Mutex::new(None),
                kv: Mutex::new(None),
                dirty: AtomicBool::new(false),
                tick_pending: AtomicBool::new(false),
            }),
            saver: Mutex::new(None),
            injected_store: Mutex::new(None),
        }
    }

    /// Creates a handle over a caller-provided KV store instead of the
    /// file-backed default. The snapshot still lives under key `"db"`.
    pub fn with_store(options: BlobOptions, store: KvStore) -> Self {
        let adapter = Self::new(options);
        *adapter.injected_store.lock() = Some(store);
        adapter
    }

    /// True when committed writes have not been persisted yet.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.state.ensure_open()?;
        let guard = self.inner.conn.lock();
        let conn = guard.as_ref().ok_or(Error::NotOpen {
            kind: AdapterKind::Blob,
        })?;
        f(conn)
    }

    /// Marks the engine dirty after a committed mutation and drives the
    /// write-through-then-batch policy.
    async fn mark_mutated(&self) -> Result<()> {
        if self.tx.is_active() {
            // Uncommitted state never reaches the store; commit marks.
            return Ok(());
        }
        self.inner.dirty.store(true, Ordering::Release);
        if !self.options.auto_save {
            return Ok(());
        }
        if !self.inner.tick_pending.swap(true, Ordering::AcqRel) {
            // First mutation of the window: write through immediately.
            self.inner.persist().await?;
        }
        Ok(())
    }

    fn spawn_saver(&self) {
        if !self.options.auto_save {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let interval = self.options.save_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                inner.tick_pending.store(false, Ordering::Release);
                if let Err(e) = inner.persist_if_dirty().await {
                    warn!(error = %e, "periodic snapshot persistence failed");
                }
            }
        });
        *self.saver.lock() = Some(handle);
    }

    fn stop_saver(&self) {
        if let Some(handle) = self.saver.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl StorageAdapter for BlobAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Blob
    }

    fn state(&self) -> AdapterState {
        self.state.get()
    }

    fn context(&self) -> AdapterContext {
        AdapterContext {
            kind: AdapterKind::Blob,
            capabilities: AdapterKind::Blob.capabilities(),
            descriptor: format!("{}/{}", self.options.db_name, self.options.store_name),
            limitations: LIMITATIONS,
        }
    }

    async fn open(&self) -> Result<()> {
        if !self.state.begin_open()? {
            return Ok(());
        }

        let opened: Result<()> = async {
            let kv = match self.injected_store.lock().clone() {
                Some(store) => store,
                None => KvStore::file(self.options.store_path(), &self.options.store_name)
                    .map_err(|e| Error::open_failed(AdapterKind::Blob, e))?,
            };

            let blob = kv
                .get(SNAPSHOT_KEY)
                .await
                .map_err(|e| Error::open_failed(AdapterKind::Blob, e))?;

            let conn = match &blob {
                Some(bytes) => snapshot::import_bytes(bytes)
                    .map_err(|e| Error::open_failed(AdapterKind::Blob, e))?,
                None => Connection::open_in_memory()
                    .map_err(|e| Error::open_failed(AdapterKind::Blob, e))?,
            };

            *self.inner.conn.lock() = Some(conn);
            *self.inner.kv.lock() = Some(kv);
            info!(
                db = %self.options.db_name,
                restored = blob.is_some(),
                "blob-persisted engine opened"
            );
            Ok(())
        }
        .await;

        match opened {
            Ok(()) => {
                self.state.open_succeeded();
                self.spawn_saver();
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
        self.stop_saver();

        let flush = self.inner.persist_if_dirty().await;

        let kv = self.inner.kv.lock().take();
        if let Some(kv) = kv
            && let Err(e) = kv.close().await
        {
            warn!(error = %e, "KV store close failed");
        }
        self.inner.conn.lock().take();
        self.inner.tick_pending.store(false, Ordering::Release);
        self.tx.clear();

        match flush {
            Ok(()) => {
                self.state.close_succeeded();
                debug!(db = %self.options.db_name, "blob-persisted engine closed");
                Ok(())
            }
            Err(e) => {
                self.state.close_failed();
                Err(e)
            }
        }
    }

    async fn run(&self, sql: &str, params: &Params) -> Result<RunResult> {
        let result = self.with_conn(|conn| engine::run_on(AdapterKind::Blob, conn, sql, params))?;
        self.mark_mutated().await?;
        Ok(result)
    }

    async fn all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.with_conn(|conn| engine::query_on(AdapterKind::Blob, conn, sql, params))
    }

    async fn exec(&self, script: &str) -> Result<()> {
        self.with_conn(|conn| engine::exec_on(AdapterKind::Blob, conn, script))?;
        self.mark_mutated().await
    }

    async fn begin(&self) -> Result<()> {
        self.tx.try_begin()?;
        let result = self.with_conn(|conn| engine::exec_on(AdapterKind::Blob, conn, "BEGIN"));
        if result.is_err() {
            self.tx.clear();
        }
        result
    }

    async fn commit(&self) -> Result<()> {
        self.tx.ensure_active()?;
        self.with_conn(|conn| engine::exec_on(AdapterKind::Blob, conn, "COMMIT"))?;
        self.tx.try_end()?;
        self.mark_mutated().await
    }

    async fn rollback(&self) -> Result<()> {
        self.tx.try_end()?;
        self.with_conn(|conn| engine::exec_on(AdapterKind::Blob, conn, "ROLLBACK"))
    }

    async fn export_snapshot(&self) -> Result<Vec<u8>> {
        self.state.ensure_open()?;
        self.inner.export()
    }

    /// Replaces the engine with the given image, marks dirty and persists
    /// immediately.
    async fn import_snapshot(&self, bytes: Vec<u8>) -> Result<()> {
        self.state.ensure_open()?;
        let conn =
            snapshot::import_bytes(&bytes).map_err(|e| Error::backend(AdapterKind::Blob, e))?;
        *self.inner.conn.lock() = Some(conn);
        self.inner.dirty.store(true, Ordering::Release);
        self.inner.persist().await
    }
}

impl Drop for BlobAdapter {
    fn drop(&mut self) {
        self.stop_saver();
    }
}
