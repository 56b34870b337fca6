//! unistore: one storage contract over heterogeneous SQL backends.
//!
//! Applications write backend-agnostic code against [`Storage`]; the
//! resolver decides at runtime which backend to bind, walking a priority
//! list with ordered fallback. Each backend advertises a fixed capability
//! set, and optional features degrade gracefully through helpers like
//! [`Storage::batch_or_fallback`].
//!
//! # Backends
//!
//! | kind      | engine                                               |
//! |-----------|------------------------------------------------------|
//! | `native`  | file-backed embedded SQLite, synchronous core        |
//! | `wasm`    | single-task in-memory engine, optional file persist  |
//! | `network` | pooled PostgreSQL, `$N` placeholders                 |
//! | `blob`    | in-memory engine snapshotted into a KV store         |
//! | `mobile`  | host-provided native SQL plugin                      |
//! | `memory`  | plain in-memory engine                               |
//!
//! # Example
//!
//! ```ignore
//! use unistore::{resolve, NativeOptions, Params, StorageConfig};
//!
//! let db = resolve(StorageConfig::native(NativeOptions::new("app.db"))).await?;
//! db.exec("CREATE TABLE t (k TEXT PRIMARY KEY, v INTEGER)").await?;
//! db.run("INSERT INTO t VALUES (?, ?)", &Params::positional(vec!["a".into(), 1i64.into()])).await?;
//! let row = db.get("SELECT v FROM t WHERE k = ?", &Params::single("a")).await?;
//! ```
//!
//! Replication between two handles goes through [`SyncManager`]; periodic
//! object-store backups through [`backup::BackupManager`].

pub mod adapter;
pub mod backup;
pub mod capability;
pub mod config;
pub mod dump;
pub mod error;
pub mod kv;
pub mod params;
pub mod placeholder;
pub mod resolver;
mod service;
mod snapshot;
pub mod sync;
pub mod types;

pub use adapter::{
    AdapterContext, AdapterKind, AdapterState, BatchOp, BatchResult, BlobAdapter, BlobOptions,
    MemoryAdapter, MobileAdapter, MobileOptions, MobilePlugin, NativeAdapter, NativeOptions,
    NetworkAdapter, NetworkOptions, StorageAdapter, WasmAdapter, WasmOptions,
};
pub use capability::{Capability, CapabilitySet};
pub use config::{STORAGE_ADAPTER_ENV, StorageConfig};
pub use error::{Error, Result};
pub use params::Params;
pub use resolver::resolve;
pub use service::{Prepared, Storage};
pub use sync::{
    ConflictStrategy, SyncConflict, SyncManager, SyncMode, SyncOptions, SyncResult,
    TableSyncOptions,
};
pub use types::{Row, RowId, RunResult, Value};
