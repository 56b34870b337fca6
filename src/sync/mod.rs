//! Offline-first replication between two storage handles.
//!
//! A [`SyncManager`] coordinates a primary and a remote handle: it probes
//! connectivity, replicates tables in priority order under a configurable
//! direction and conflict policy, enforces storage budgets, and drives
//! cycles under one of five scheduling modes. All asynchronous state
//! (timers, cycles, callbacks) lives in a single worker task fed by a
//! command channel.

mod config;
mod conflict;
mod record;
mod worker;

pub use config::{
    BudgetAction, ConflictStrategy, MergeFn, SyncCallbacks, SyncDirection, SyncMode, SyncOptions,
    TablePriority, TableSyncOptions,
};
pub use record::{ID_COLUMN, SyncRecord, SyncStamp, UPDATED_AT_COLUMN};

use crate::error::{Error, Result};
use crate::service::Storage;
use crate::types::Row;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, oneshot};
use worker::{Command, SharedState, Worker};

/// Command channel depth; senders briefly queue behind an in-flight cycle.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// A row present on both sides with diverging update stamps.
#[derive(Debug, Clone, Serialize)]
pub struct SyncConflict {
    /// Table the conflict occurred in.
    pub table: String,
    /// Stable record identifier.
    pub id: String,
    /// Local row at conflict time.
    pub local: Row,
    /// Remote row at conflict time.
    pub remote: Row,
    /// Applied resolution label (`local`, `remote`, `merged`, `both`).
    pub resolution: String,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    /// Whether the cycle completed without errors.
    pub success: bool,
    /// Rows written on either side.
    pub records_synced: u64,
    /// Conflicts encountered, in table order.
    pub conflicts: Vec<SyncConflict>,
    /// Diagnostics accumulated during the cycle.
    pub errors: Vec<String>,
    /// Wall-clock duration of the cycle.
    pub duration_ms: u64,
    /// When the cycle started.
    pub timestamp: DateTime<Utc>,
}

impl SyncResult {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            records_synced: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            duration_ms: 0,
            timestamp,
        }
    }
}

/// Progress notification for one table within a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProgress {
    /// Table being replicated.
    pub table: String,
    /// Zero-based position within the cycle.
    pub index: usize,
    /// Number of tables in the cycle.
    pub total: usize,
}

/// Handle to the replication worker.
///
/// Dropping the manager without `close` leaves the worker running until
/// every command sender is gone; call [`SyncManager::close`] for a
/// deterministic shutdown that aborts an in-flight cycle at the next
/// table boundary.
pub struct SyncManager {
    primary: Storage,
    shared: Arc<SharedState>,
    commands: mpsc::Sender<Command>,
    worker: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SyncManager {
    /// Spawns the worker over an open primary/remote pair.
    ///
    /// Mode-driven scheduling is armed immediately; use `stop`/`start` to
    /// toggle it.
    pub fn new(primary: Storage, remote: Storage, options: SyncOptions) -> Self {
        let shared = Arc::new(SharedState::new());
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let mutations = primary.subscribe_mutations();

        let worker = Worker::new(
            primary.quiet(),
            remote.quiet(),
            options,
            Arc::clone(&shared),
        );
        let handle = tokio::spawn(worker.run(command_rx, mutations));

        Self {
            primary,
            shared,
            commands,
            worker: parking_lot::Mutex::new(Some(handle)),
        }
    }

    /// Runs one cycle and returns its result.
    ///
    /// # Errors
    ///
    /// Returns an error only when the manager is closed; cycle failures
    /// are reported inside the [`SyncResult`].
    pub async fn sync(&self) -> Result<SyncResult> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Sync { reply: Some(reply) })
            .await
            .map_err(|_| Error::config("sync manager is closed"))?;
        response
            .await
            .map_err(|_| Error::config("sync manager is closed"))
    }

    /// Enables mode-driven scheduling.
    ///
    /// # Errors
    ///
    /// Returns an error when the manager is closed.
    pub async fn start(&self) -> Result<()> {
        self.commands
            .send(Command::Start)
            .await
            .map_err(|_| Error::config("sync manager is closed"))
    }

    /// Disables mode-driven scheduling; explicit `sync` still works.
    ///
    /// # Errors
    ///
    /// Returns an error when the manager is closed.
    pub async fn stop(&self) -> Result<()> {
        self.commands
            .send(Command::Stop)
            .await
            .map_err(|_| Error::config("sync manager is closed"))
    }

    /// Cancels timers, aborts an in-flight cycle at the next table
    /// boundary, and waits for the worker to stop.
    pub async fn close(&self) {
        self.shared.cancel.store(true, Ordering::Release);
        let _ = self.commands.send(Command::Close).await;
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// The primary storage handle.
    pub fn db(&self) -> &Storage {
        &self.primary
    }

    /// Whether a cycle is currently executing.
    pub fn syncing(&self) -> bool {
        self.shared.syncing.load(Ordering::Acquire)
    }

    /// Whether the last connectivity probe succeeded.
    pub fn online(&self) -> bool {
        self.shared.online.load(Ordering::Acquire)
    }

    /// When the last successful cycle started.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_sync.read()
    }
}
