//! High-level `Storage` wrapper over adapter implementations.
//!
//! Wraps any [`StorageAdapter`] and provides a consistent API regardless
//! of the underlying engine: closure-based transactions, capability
//! degradation helpers, and a mutation broadcast that the sync manager
//! listens to.

use crate::adapter::{
    AdapterContext, AdapterKind, AdapterState, BatchError, BatchOp, BatchResult, BlobAdapter,
    BlobOptions, MemoryAdapter, MobileAdapter, MobileOptions, NativeAdapter, NativeOptions,
    NetworkAdapter, NetworkOptions, StorageAdapter, WasmAdapter, WasmOptions,
};
use crate::capability::{Capability, CapabilitySet};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::types::{Row, RunResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Capacity of the mutation broadcast; laggards only miss coalesced
/// wake-ups, never data.
const MUTATION_CHANNEL_CAPACITY: usize = 64;

/// High-level storage interface over one open backend.
///
/// `Storage` is `Clone` and can be shared across tasks; all clones route
/// through the same handle, which serializes operations per the backend's
/// concurrency model.
#[derive(Clone)]
pub struct Storage {
    adapter: Arc<dyn StorageAdapter>,
    mutations: broadcast::Sender<()>,
    notify: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("kind", &self.adapter.kind())
            .field("notify", &self.notify)
            .finish()
    }
}

impl Storage {
    /// Wraps an adapter without opening it.
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        let (mutations, _) = broadcast::channel(MUTATION_CHANNEL_CAPACITY);
        Self {
            adapter,
            mutations,
            notify: true,
        }
    }

    /// A clone whose writes do not notify mutation subscribers. The sync
    /// worker uses this so its own replication writes never reschedule it.
    pub(crate) fn quiet(&self) -> Self {
        Self {
            notify: false,
            ..self.clone()
        }
    }

    /// Creates and opens an in-memory backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created.
    pub async fn memory() -> Result<Self> {
        Self::open_adapter(Arc::new(MemoryAdapter::new())).await
    }

    /// Creates and opens a native file-backed backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub async fn native(options: NativeOptions) -> Result<Self> {
        Self::open_adapter(Arc::new(NativeAdapter::new(options))).await
    }

    /// Creates and opens a single-task embedded backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created or the persisted
    /// file is unreadable.
    pub async fn wasm(options: WasmOptions) -> Result<Self> {
        Self::open_adapter(Arc::new(WasmAdapter::new(options))).await
    }

    /// Creates and opens a blob-persisted backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the KV store or the engine cannot be opened.
    pub async fn blob(options: BlobOptions) -> Result<Self> {
        Self::open_adapter(Arc::new(BlobAdapter::new(options))).await
    }

    /// Creates and opens a network-attached backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot connect.
    pub async fn network(options: NetworkOptions) -> Result<Self> {
        Self::open_adapter(Arc::new(NetworkAdapter::new(options))).await
    }

    /// Creates and opens a mobile plugin backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin refuses to open the database.
    pub async fn mobile(options: MobileOptions) -> Result<Self> {
        Self::open_adapter(Arc::new(MobileAdapter::new(options))).await
    }

    async fn open_adapter(adapter: Arc<dyn StorageAdapter>) -> Result<Self> {
        adapter.open().await?;
        Ok(Self::new(adapter))
    }

    /// Stable kind identifier of the wrapped backend.
    pub fn kind(&self) -> AdapterKind {
        self.adapter.kind()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AdapterState {
        self.adapter.state()
    }

    /// Immutable handle context.
    pub fn context(&self) -> AdapterContext {
        self.adapter.context()
    }

    /// Fixed capability declaration.
    pub fn capabilities(&self) -> CapabilitySet {
        self.adapter.capabilities()
    }

    /// Establishes the backend connection. No-op if already open.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses to open or a concurrent
    /// lifecycle transition is in flight.
    pub async fn open(&self) -> Result<()> {
        self.adapter.open().await
    }

    /// Flushes pending persistence and releases resources. No-op if
    /// already closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub async fn close(&self) -> Result<()> {
        self.adapter.close().await
    }

    /// Executes a single mutating statement.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or execution fails.
    pub async fn run(&self, sql: &str, params: &Params) -> Result<RunResult> {
        let result = self.adapter.run(sql, params).await?;
        self.notify_mutation();
        Ok(result)
    }

    /// Returns the first row of a query, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or execution fails.
    pub async fn get(&self, sql: &str, params: &Params) -> Result<Option<Row>> {
        self.adapter.get(sql, params).await
    }

    /// Returns every row of a query.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or execution fails.
    pub async fn all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.adapter.all(sql, params).await
    }

    /// Executes a multi-statement script with no result set.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub async fn exec(&self, script: &str) -> Result<()> {
        self.adapter.exec(script).await?;
        self.notify_mutation();
        Ok(())
    }

    /// Runs `f` inside a flat transaction.
    ///
    /// The closure receives a handle routing through the same
    /// transactional executor. On success the transaction commits; on
    /// error it rolls back and the error is re-raised. Nested calls fail
    /// with `TransactionActive`.
    ///
    /// # Errors
    ///
    /// Returns the closure's error after rollback, or the commit error.
    pub async fn transaction<R, F, Fut>(&self, f: F) -> Result<R>
    where
        F: FnOnce(Storage) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.adapter.begin().await?;
        match f(self.clone()).await {
            Ok(value) => {
                if let Err(commit_err) = self.adapter.commit().await {
                    if let Err(rollback_err) = self.adapter.rollback().await {
                        warn!(error = %rollback_err, "rollback failed after commit error");
                    }
                    return Err(commit_err);
                }
                self.notify_mutation();
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.adapter.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after transaction error");
                }
                Err(e)
            }
        }
    }

    /// Executes operations inside one implicit transaction. Requires the
    /// `batch` capability; use [`Storage::batch_or_fallback`] to degrade.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityUnavailable` on backends without `batch`.
    pub async fn batch(&self, ops: Vec<BatchOp>) -> Result<BatchResult> {
        let result = self.adapter.batch(ops).await?;
        self.notify_mutation();
        Ok(result)
    }

    /// Executes a batch natively where supported, otherwise emulates it by
    /// running the operations sequentially inside one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error only when the enclosing transaction cannot start
    /// or commit; per-operation failures are reported in the result.
    pub async fn batch_or_fallback(&self, ops: Vec<BatchOp>) -> Result<BatchResult> {
        if self.capabilities().has(Capability::Batch) {
            return self.batch(ops).await;
        }

        self.adapter.begin().await?;
        let mut result = BatchResult::default();
        for (index, op) in ops.iter().enumerate() {
            match self.adapter.run(&op.sql, &op.params).await {
                Ok(run) => {
                    result.successful += 1;
                    result.results.push(Some(run));
                }
                Err(e) => {
                    result.failed += 1;
                    result.results.push(None);
                    result.errors.push(BatchError {
                        index,
                        message: e.to_string(),
                    });
                }
            }
        }
        self.adapter.commit().await?;
        self.notify_mutation();
        Ok(result)
    }

    /// Returns a prepared-statement handle. Requires the `prepared`
    /// capability; use [`Storage::prepare_or_direct`] to degrade.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityUnavailable` on backends without `prepared`.
    pub fn prepare(&self, sql: impl Into<String>) -> Result<Prepared> {
        if !self.capabilities().has(Capability::Prepared) {
            return Err(Error::CapabilityUnavailable {
                kind: self.kind(),
                capability: Capability::Prepared,
            });
        }
        Ok(Prepared {
            storage: self.clone(),
            sql: sql.into(),
        })
    }

    /// Returns a statement handle backed by the engine's cache where
    /// supported, or by direct execution otherwise.
    pub fn prepare_or_direct(&self, sql: impl Into<String>) -> Prepared {
        Prepared {
            storage: self.clone(),
            sql: sql.into(),
        }
    }

    /// Serializes the full database state, where the engine supports it.
    ///
    /// # Errors
    ///
    /// Returns an error on backends without snapshot support.
    pub async fn export_snapshot(&self) -> Result<Vec<u8>> {
        self.adapter.export_snapshot().await
    }

    /// Replaces the engine with the given database image.
    ///
    /// # Errors
    ///
    /// Returns an error on backends without snapshot support or when the
    /// image is invalid.
    pub async fn import_snapshot(&self, bytes: Vec<u8>) -> Result<()> {
        self.adapter.import_snapshot(bytes).await?;
        self.notify_mutation();
        Ok(())
    }

    /// Subscribes to mutation notifications. One message is sent after
    /// every committed mutation through this wrapper.
    pub fn subscribe_mutations(&self) -> broadcast::Receiver<()> {
        self.mutations.subscribe()
    }

    fn notify_mutation(&self) {
        if !self.notify {
            return;
        }
        // No receivers is the common case outside sync; ignore.
        let _ = self.mutations.send(());
    }
}

/// Handle to a statement with pre-parsed SQL.
///
/// On engines with a prepared-statement cache, repeated executions reuse
/// the cached statement keyed by text; otherwise each call executes
/// directly.
#[derive(Clone)]
pub struct Prepared {
    storage: Storage,
    sql: String,
}

impl Prepared {
    /// Executes the statement as a mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or execution fails.
    pub async fn run(&self, params: &Params) -> Result<RunResult> {
        self.storage.run(&self.sql, params).await
    }

    /// Returns the first row, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or execution fails.
    pub async fn get(&self, params: &Params) -> Result<Option<Row>> {
        self.storage.get(&self.sql, params).await
    }

    /// Returns every row.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or execution fails.
    pub async fn all(&self, params: &Params) -> Result<Vec<Row>> {
        self.storage.all(&self.sql, params).await
    }

    /// Releases the handle. Cached statements are finalized by the engine
    /// when the adapter closes.
    pub fn finalize(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[tokio::test]
    async fn transaction_commits_on_success() {
        let db = Storage::memory().await.unwrap();
        db.exec("CREATE TABLE t (v INTEGER)").await.unwrap();

        db.transaction(|t| async move {
            t.run("INSERT INTO t VALUES (1)", &Params::Empty).await?;
            t.run("INSERT INTO t VALUES (2)", &Params::Empty).await?;
            Ok(())
        })
        .await
        .unwrap();

        let row = db
            .get("SELECT count(*) AS n FROM t", &Params::Empty)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("n"), Some(&Value::Integer(2)));
    }

    #[tokio::test]
    async fn transaction_rolls_back_and_reraises() {
        let db = Storage::memory().await.unwrap();
        db.exec("CREATE TABLE t (v INTEGER)").await.unwrap();

        let err = db
            .transaction(|t| async move {
                t.run("INSERT INTO t VALUES (1)", &Params::Empty).await?;
                Err::<(), _>(Error::config("boom"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m == "boom"));

        let row = db
            .get("SELECT count(*) AS n FROM t", &Params::Empty)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("n"), Some(&Value::Integer(0)));
    }

    #[tokio::test]
    async fn nested_transactions_are_rejected() {
        let db = Storage::memory().await.unwrap();
        db.exec("CREATE TABLE t (v INTEGER)").await.unwrap();

        let err = db
            .transaction(|t| async move {
                t.transaction(|_| async move { Ok(()) }).await?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactionActive { .. }));
    }

    #[tokio::test]
    async fn batch_or_fallback_runs_inside_one_transaction() {
        let db = Storage::memory().await.unwrap();
        db.exec("CREATE TABLE t (v INTEGER)").await.unwrap();

        let ops = vec![
            BatchOp::new("INSERT INTO t VALUES (?)", Params::single(1i64)),
            BatchOp::new("INSERT INTO t VALUES (?)", Params::single(2i64)),
        ];
        let result = db.batch_or_fallback(ops).await.unwrap();
        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 0);
    }

    #[tokio::test]
    async fn prepare_requires_capability() {
        let db = Storage::memory().await.unwrap();
        assert!(db.prepare("SELECT 1").is_ok());

        let stmt = db.prepare_or_direct("SELECT 1 AS one");
        let row = stmt.get(&Params::Empty).await.unwrap().unwrap();
        assert_eq!(row.get("one"), Some(&Value::Integer(1)));
        stmt.finalize();
    }

    #[tokio::test]
    async fn mutation_subscribers_see_writes() {
        let db = Storage::memory().await.unwrap();
        let mut rx = db.subscribe_mutations();
        db.exec("CREATE TABLE t (v INTEGER)").await.unwrap();
        db.run("INSERT INTO t VALUES (1)", &Params::Empty)
            .await
            .unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
