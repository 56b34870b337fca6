//! Configuration for the sync manager.

use crate::error::Error;
use crate::types::Row;
use std::sync::Arc;
use std::time::Duration;

use super::{SyncConflict, SyncProgress, SyncResult};

/// When sync cycles are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Only explicit `sync()` calls.
    #[default]
    Manual,
    /// Debounced after each primary mutation.
    Auto,
    /// Fixed interval.
    Periodic,
    /// Immediately on every mutation, queued behind an in-flight cycle.
    Realtime,
    /// Only when connectivity to the remote is restored.
    OnReconnect,
}

/// Which directions a cycle replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncDirection {
    #[default]
    Bidirectional,
    PushOnly,
    PullOnly,
}

impl SyncDirection {
    pub fn includes_pull(self) -> bool {
        matches!(self, Self::Bidirectional | Self::PullOnly)
    }

    pub fn includes_push(self) -> bool {
        matches!(self, Self::Bidirectional | Self::PushOnly)
    }
}

/// How a diverging record pair is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
    /// Keep the record with the greater update stamp; ties prefer remote.
    #[default]
    LastWriteWins,
    /// Keep the local record.
    LocalWins,
    /// Overwrite local with remote.
    RemoteWins,
    /// Apply a caller-supplied merge function.
    Merge,
    /// Keep both; the remote copy is inserted under a derived id.
    KeepBoth,
}

/// Table ordering within a cycle. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TablePriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

/// What happens when the storage budget is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BudgetAction {
    /// Emit the error callback and continue.
    #[default]
    Warn,
    /// Fail the cycle.
    Error,
    /// Delete the oldest records until within budget.
    Prune,
}

/// Caller-supplied merge for the `Merge` strategy. Receives the local and
/// remote rows and returns the row to keep.
pub type MergeFn = Arc<dyn Fn(&Row, &Row) -> Result<Row, String> + Send + Sync>;

/// Per-table overrides.
#[derive(Debug, Clone)]
pub struct TableSyncOptions {
    /// Table name.
    pub name: String,
    /// Ordering within a cycle; ties keep insertion order.
    pub priority: TablePriority,
    /// Cap on locally retained rows; oldest beyond the cap are pruned.
    pub max_records: Option<u64>,
    /// Omit the table from every cycle.
    pub skip: bool,
}

impl TableSyncOptions {
    /// A table with default priority and no cap.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: TablePriority::default(),
            max_records: None,
            skip: false,
        }
    }

    /// Sets the cycle priority.
    pub fn priority(mut self, priority: TablePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Caps locally retained rows.
    pub fn max_records(mut self, max: u64) -> Self {
        self.max_records = Some(max);
        self
    }

    /// Excludes the table from cycles.
    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }
}

/// Observer hooks invoked from the sync worker.
#[derive(Clone, Default)]
pub struct SyncCallbacks {
    pub on_sync: Option<Arc<dyn Fn(&SyncResult) + Send + Sync>>,
    pub on_conflict: Option<Arc<dyn Fn(&SyncConflict) + Send + Sync>>,
    pub on_offline: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_online: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&Error) + Send + Sync>>,
    pub on_progress: Option<Arc<dyn Fn(&SyncProgress) + Send + Sync>>,
}

impl std::fmt::Debug for SyncCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCallbacks")
            .field("on_sync", &self.on_sync.is_some())
            .field("on_conflict", &self.on_conflict.is_some())
            .field("on_offline", &self.on_offline.is_some())
            .field("on_online", &self.on_online.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Sync manager configuration.
#[derive(Clone)]
pub struct SyncOptions {
    /// Scheduling mode.
    pub mode: SyncMode,
    /// Cycle interval for `Periodic`, and the reconnect probe interval
    /// while offline under `OnReconnect`.
    pub interval: Duration,
    /// Quiet window after a mutation under `Auto`.
    pub debounce: Duration,
    /// Replication direction.
    pub direction: SyncDirection,
    /// Conflict resolution policy.
    pub strategy: ConflictStrategy,
    /// Merge function for [`ConflictStrategy::Merge`].
    pub merge: Option<MergeFn>,
    /// Primary storage budget in megabytes.
    pub storage_limit_mb: Option<u64>,
    /// Action when the budget is exceeded.
    pub limit_action: BudgetAction,
    /// Tables to replicate, in insertion order.
    pub tables: Vec<TableSyncOptions>,
    /// Fail the cycle on a row-count mismatch during verification.
    pub strict_verification: bool,
    /// Observer hooks.
    pub callbacks: SyncCallbacks,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            interval: Duration::from_secs(30),
            debounce: Duration::from_millis(500),
            direction: SyncDirection::default(),
            strategy: ConflictStrategy::default(),
            merge: None,
            storage_limit_mb: None,
            limit_action: BudgetAction::default(),
            tables: Vec::new(),
            strict_verification: false,
            callbacks: SyncCallbacks::default(),
        }
    }
}

impl SyncOptions {
    /// Adds a table to replicate.
    pub fn table(mut self, table: TableSyncOptions) -> Self {
        self.tables.push(table);
        self
    }

    /// Tables in cycle order: by priority, ties in insertion order, with
    /// skipped tables removed.
    pub(super) fn ordered_tables(&self) -> Vec<TableSyncOptions> {
        let mut tables: Vec<TableSyncOptions> =
            self.tables.iter().filter(|t| !t.skip).cloned().collect();
        tables.sort_by_key(|t| t.priority);
        tables
    }
}

impl std::fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOptions")
            .field("mode", &self.mode)
            .field("interval", &self.interval)
            .field("debounce", &self.debounce)
            .field("direction", &self.direction)
            .field("strategy", &self.strategy)
            .field("merge", &self.merge.is_some())
            .field("storage_limit_mb", &self.storage_limit_mb)
            .field("limit_action", &self.limit_action)
            .field("tables", &self.tables)
            .field("strict_verification", &self.strict_verification)
            .finish_non_exhaustive()
    }
}
