//! The polymorphic storage contract and its backend implementations.
//!
//! Every backend implements [`StorageAdapter`]: a uniform, asynchronous
//! operation surface over one engine. A handle owns its engine resources
//! exclusively; lifetime is bounded by `open` → `close` and observable
//! through [`StorageAdapter::state`].

mod blob;
mod engine;
mod memory;
mod mobile;
mod native;
mod network;
mod wasm;

pub use blob::{BlobAdapter, BlobOptions};
pub use memory::MemoryAdapter;
pub use mobile::{MobileAdapter, MobileOptions, MobilePlugin, PluginRunResult};
pub use native::{NativeAdapter, NativeOptions};
pub use network::{NetworkAdapter, NetworkOptions};
pub use wasm::{WasmAdapter, WasmOptions};

use crate::capability::{Capability, CapabilitySet};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::types::{Row, RunResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Stable identifier of an adapter variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    /// File-backed embedded engine, synchronous core.
    Native,
    /// Single-task in-memory engine with optional file persistence.
    Wasm,
    /// Connection-pooled network-attached relational engine.
    Network,
    /// In-memory engine persisted as a snapshot blob into a KV store.
    Blob,
    /// Host-provided native SQL plugin.
    Mobile,
    /// Plain in-memory engine, no persistence.
    Memory,
}

impl AdapterKind {
    /// Every kind, in default resolution order preference.
    pub const ALL: [AdapterKind; 6] = [
        AdapterKind::Native,
        AdapterKind::Wasm,
        AdapterKind::Network,
        AdapterKind::Blob,
        AdapterKind::Mobile,
        AdapterKind::Memory,
    ];

    /// Stable kind identifier, as accepted by the `STORAGE_ADAPTER`
    /// environment variable.
    pub fn as_str(self) -> &'static str {
        match self {
            AdapterKind::Native => "native",
            AdapterKind::Wasm => "wasm",
            AdapterKind::Network => "network",
            AdapterKind::Blob => "blob",
            AdapterKind::Mobile => "mobile",
            AdapterKind::Memory => "memory",
        }
    }

    /// Parses a kind identifier.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }

    /// The fixed capability declaration for this kind.
    pub fn capabilities(self) -> CapabilitySet {
        match self {
            AdapterKind::Native => {
                CapabilitySet::SYNC
                    | CapabilitySet::TRANSACTIONS
                    | CapabilitySet::WAL
                    | CapabilitySet::LOCKS
                    | CapabilitySet::PERSISTENCE
                    | CapabilitySet::PREPARED
                    | CapabilitySet::BATCH
            }
            AdapterKind::Wasm => {
                CapabilitySet::TRANSACTIONS | CapabilitySet::PREPARED | CapabilitySet::JSON
            }
            AdapterKind::Network => {
                CapabilitySet::TRANSACTIONS
                    | CapabilitySet::LOCKS
                    | CapabilitySet::PERSISTENCE
                    | CapabilitySet::CONCURRENT
                    | CapabilitySet::JSON
                    | CapabilitySet::ARRAYS
                    | CapabilitySet::PREPARED
            }
            AdapterKind::Blob => {
                CapabilitySet::TRANSACTIONS | CapabilitySet::PERSISTENCE | CapabilitySet::JSON
            }
            AdapterKind::Mobile => {
                CapabilitySet::TRANSACTIONS
                    | CapabilitySet::WAL
                    | CapabilitySet::LOCKS
                    | CapabilitySet::PERSISTENCE
            }
            AdapterKind::Memory => {
                CapabilitySet::TRANSACTIONS | CapabilitySet::PREPARED | CapabilitySet::BATCH
            }
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an adapter handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdapterState {
    Closed = 0,
    Opening = 1,
    Open = 2,
    Closing = 3,
    Error = 4,
}

impl AdapterState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Open,
            3 => Self::Closing,
            4 => Self::Error,
            _ => Self::Closed,
        }
    }
}

/// Immutable snapshot describing an open handle.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// Adapter variant.
    pub kind: AdapterKind,
    /// Fixed capability declaration.
    pub capabilities: CapabilitySet,
    /// Human-readable connection descriptor (path, URL, database name).
    pub descriptor: String,
    /// Declared limitations of this backend.
    pub limitations: &'static [&'static str],
}

/// One operation of a batch.
#[derive(Debug, Clone)]
pub struct BatchOp {
    /// Mutating statement text.
    pub sql: String,
    /// Parameters for the statement.
    pub params: Params,
}

impl BatchOp {
    /// Convenience constructor.
    pub fn new(sql: impl Into<String>, params: Params) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Failure of one operation inside a batch.
#[derive(Debug, Clone)]
pub struct BatchError {
    /// Index of the failed operation within the batch.
    pub index: usize,
    /// Engine error message.
    pub message: String,
}

/// Per-operation outcome of a batch execution.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// Operations that completed.
    pub successful: usize,
    /// Operations that failed.
    pub failed: usize,
    /// One entry per operation, `None` where the operation failed.
    pub results: Vec<Option<RunResult>>,
    /// Failure details, in operation order.
    pub errors: Vec<BatchError>,
}

/// The polymorphic operation surface over one backend engine.
///
/// All operations are asynchronous; backends with a synchronous core
/// (`sync` capability) run statements on a blocking thread under the same
/// façade. Only one outstanding operation per handle is supported; the
/// [`crate::Storage`] wrapper and the engine-side locks serialize callers.
#[async_trait]
pub trait StorageAdapter: Send + Sync + 'static {
    /// Stable kind identifier of this adapter.
    fn kind(&self) -> AdapterKind;

    /// Current lifecycle state.
    fn state(&self) -> AdapterState;

    /// Immutable context snapshot for this handle.
    fn context(&self) -> AdapterContext;

    /// Fixed capability declaration.
    fn capabilities(&self) -> CapabilitySet {
        self.kind().capabilities()
    }

    /// Establishes the backend connection. Idempotent if already open;
    /// a concurrent open fails fast with `AlreadyOpening`.
    async fn open(&self) -> Result<()>;

    /// Flushes pending persistence and releases engine resources.
    /// Idempotent if already closed.
    async fn close(&self) -> Result<()>;

    /// Executes a single mutating statement.
    async fn run(&self, sql: &str, params: &Params) -> Result<RunResult>;

    /// Returns the first row of a query, or `None`.
    async fn get(&self, sql: &str, params: &Params) -> Result<Option<Row>> {
        Ok(self.all(sql, params).await?.into_iter().next())
    }

    /// Returns every row of a query.
    async fn all(&self, sql: &str, params: &Params) -> Result<Vec<Row>>;

    /// Executes a multi-statement script with no result set. Statements
    /// are split on top-level `;`, respecting quotes.
    async fn exec(&self, script: &str) -> Result<()>;

    /// Starts a flat transaction. A second `begin` before `commit` or
    /// `rollback` fails with `TransactionActive`.
    async fn begin(&self) -> Result<()>;

    /// Commits the active transaction.
    async fn commit(&self) -> Result<()>;

    /// Rolls back the active transaction.
    async fn rollback(&self) -> Result<()>;

    /// Executes operations inside one implicit transaction, reporting
    /// per-operation success. Requires the `batch` capability.
    async fn batch(&self, ops: Vec<BatchOp>) -> Result<BatchResult> {
        let _ = ops;
        Err(Error::CapabilityUnavailable {
            kind: self.kind(),
            capability: Capability::Batch,
        })
    }

    /// Serializes the full database state, where the engine supports it.
    async fn export_snapshot(&self) -> Result<Vec<u8>> {
        Err(Error::backend(self.kind(), "snapshot export not supported"))
    }

    /// Replaces the engine with the given database image.
    async fn import_snapshot(&self, bytes: Vec<u8>) -> Result<()> {
        let _ = bytes;
        Err(Error::backend(self.kind(), "snapshot import not supported"))
    }
}

/// Observable lifecycle cell shared by the backend implementations.
///
/// Transitions: Closed → Opening → Open → Closing → Closed, with Error
/// reachable from any point. Reopening from Error is allowed.
pub(crate) struct StateCell {
    kind: AdapterKind,
    state: AtomicU8,
}

impl StateCell {
    pub(crate) fn new(kind: AdapterKind) -> Self {
        Self {
            kind,
            state: AtomicU8::new(AdapterState::Closed as u8),
        }
    }

    pub(crate) fn get(&self) -> AdapterState {
        AdapterState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: AdapterState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Claims the Opening slot. Returns `false` when the handle is
    /// already open (open is then a no-op).
    pub(crate) fn begin_open(&self) -> Result<bool> {
        loop {
            match self.get() {
                AdapterState::Open => return Ok(false),
                AdapterState::Opening => {
                    return Err(Error::AlreadyOpening { kind: self.kind });
                }
                AdapterState::Closing => {
                    return Err(Error::AlreadyClosing { kind: self.kind });
                }
                current @ (AdapterState::Closed | AdapterState::Error) => {
                    if self
                        .state
                        .compare_exchange(
                            current as u8,
                            AdapterState::Opening as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return Ok(true);
                    }
                }
            }
        }
    }

    pub(crate) fn open_succeeded(&self) {
        self.set(AdapterState::Open);
    }

    pub(crate) fn open_failed(&self) {
        self.set(AdapterState::Error);
    }

    /// Claims the Closing slot. Returns `false` when the handle is
    /// already closed (close is then a no-op).
    pub(crate) fn begin_close(&self) -> Result<bool> {
        loop {
            match self.get() {
                AdapterState::Closed => return Ok(false),
                AdapterState::Closing => {
                    return Err(Error::AlreadyClosing { kind: self.kind });
                }
                AdapterState::Opening => {
                    return Err(Error::AlreadyOpening { kind: self.kind });
                }
                current @ (AdapterState::Open | AdapterState::Error) => {
                    if self
                        .state
                        .compare_exchange(
                            current as u8,
                            AdapterState::Closing as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return Ok(true);
                    }
                }
            }
        }
    }

    pub(crate) fn close_succeeded(&self) {
        self.set(AdapterState::Closed);
    }

    pub(crate) fn close_failed(&self) {
        self.set(AdapterState::Error);
    }

    /// Fails with `NotOpen` unless the handle is open.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.get() == AdapterState::Open {
            Ok(())
        } else {
            Err(Error::NotOpen { kind: self.kind })
        }
    }
}

/// Flat-transaction guard shared by the backend implementations.
pub(crate) struct TxFlag {
    kind: AdapterKind,
    active: AtomicBool,
}

impl TxFlag {
    pub(crate) fn new(kind: AdapterKind) -> Self {
        Self {
            kind,
            active: AtomicBool::new(false),
        }
    }

    pub(crate) fn try_begin(&self) -> Result<()> {
        if self.active.swap(true, Ordering::AcqRel) {
            Err(Error::TransactionActive { kind: self.kind })
        } else {
            Ok(())
        }
    }

    pub(crate) fn try_end(&self) -> Result<()> {
        if self.active.swap(false, Ordering::AcqRel) {
            Ok(())
        } else {
            Err(Error::NoTransaction { kind: self.kind })
        }
    }

    /// Fails with `NoTransaction` unless a transaction is active. The
    /// flag is left set; commit clears it only once the engine confirms.
    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.active.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NoTransaction { kind: self.kind })
        }
    }

    pub(crate) fn clear(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
