//! The sync worker task.
//!
//! One cooperative task per manager owns all replication state: the
//! scheduling timers, per-table high-water stamps, and the online flag.
//! Callers drive it through a command channel; at most one cycle runs at
//! a time, and cancellation takes effect at the next table boundary.

use super::conflict::{self, Outcome};
use super::config::{BudgetAction, SyncMode, SyncOptions, TableSyncOptions};
use super::record::{SyncRecord, SyncStamp, upsert};
use super::{SyncConflict, SyncProgress, SyncResult};
use crate::adapter::AdapterKind;
use crate::error::{Error, Result};
use crate::params::Params;
use crate::service::Storage;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Rows deleted per prune batch before re-measuring.
const PRUNE_BATCH: u64 = 64;

/// Surrogate bytes per row when the backend exposes no file size.
const ESTIMATED_ROW_BYTES: u64 = 1024;

/// Commands accepted by the worker.
pub(super) enum Command {
    /// Run one cycle; the result goes back through `reply` when present.
    Sync {
        reply: Option<oneshot::Sender<SyncResult>>,
    },
    /// Enable mode-driven scheduling.
    Start,
    /// Disable mode-driven scheduling; explicit `Sync` still works.
    Stop,
    /// Shut the worker down.
    Close,
}

/// State observable from the manager handle.
pub(super) struct SharedState {
    pub(super) syncing: AtomicBool,
    pub(super) online: AtomicBool,
    pub(super) cancel: AtomicBool,
    pub(super) last_sync: parking_lot::RwLock<Option<DateTime<Utc>>>,
}

impl SharedState {
    pub(super) fn new() -> Self {
        Self {
            syncing: AtomicBool::new(false),
            online: AtomicBool::new(true),
            cancel: AtomicBool::new(false),
            last_sync: parking_lot::RwLock::new(None),
        }
    }
}

pub(super) struct Worker {
    primary: Storage,
    remote: Storage,
    options: SyncOptions,
    shared: Arc<SharedState>,
    /// Highest update stamp seen per table; push sends rows newer than
    /// this.
    high_water: HashMap<String, SyncStamp>,
    scheduling: bool,
}

impl Worker {
    pub(super) fn new(
        primary: Storage,
        remote: Storage,
        options: SyncOptions,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            primary,
            remote,
            options,
            shared,
            high_water: HashMap::new(),
            scheduling: true,
        }
    }

    pub(super) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut mutations: broadcast::Receiver<()>,
    ) {
        let mut debounce: Option<tokio::time::Instant> = None;
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            let deadline = debounce;
            let debounce_wait = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            let ticker_armed = self.scheduling
                && (self.options.mode == SyncMode::Periodic
                    || (self.options.mode == SyncMode::OnReconnect
                        && !self.shared.online.load(Ordering::Acquire)));

            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Close) => break,
                    Some(Command::Sync { reply }) => {
                        let result = self.cycle().await;
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    Some(Command::Start) => self.scheduling = true,
                    Some(Command::Stop) => {
                        self.scheduling = false;
                        debounce = None;
                    }
                },
                received = mutations.recv(), if self.scheduling => {
                    if matches!(received, Err(broadcast::error::RecvError::Closed)) {
                        // Every outside handle is gone; nothing left to observe.
                        self.scheduling = false;
                        continue;
                    }
                    match self.options.mode {
                        SyncMode::Auto => {
                            debounce = Some(tokio::time::Instant::now() + self.options.debounce);
                        }
                        SyncMode::Realtime => {
                            self.cycle().await;
                        }
                        _ => {}
                    }
                },
                () = debounce_wait, if debounce.is_some() => {
                    debounce = None;
                    self.cycle().await;
                },
                _ = ticker.tick(), if ticker_armed => {
                    if self.options.mode == SyncMode::Periodic {
                        self.cycle().await;
                    } else {
                        self.probe_reconnect().await;
                    }
                },
            }
        }
        debug!("sync worker stopped");
    }

    /// Offline probe under `OnReconnect`: a successful `SELECT 1` restores
    /// the online state and triggers the reconnect cycle.
    async fn probe_reconnect(&mut self) {
        if self.remote.get("SELECT 1", &Params::Empty).await.is_ok() {
            let was_online = self.shared.online.swap(true, Ordering::AcqRel);
            if !was_online {
                info!("connectivity restored");
                if let Some(cb) = &self.options.callbacks.on_online {
                    cb();
                }
                self.cycle().await;
            }
        }
    }

    fn mark_offline(&self) {
        let was_online = self.shared.online.swap(false, Ordering::AcqRel);
        if was_online {
            warn!("remote unreachable, going offline");
            if let Some(cb) = &self.options.callbacks.on_offline {
                cb();
            }
        }
    }

    fn mark_online(&self) {
        let was_online = self.shared.online.swap(true, Ordering::AcqRel);
        if !was_online {
            info!("connectivity restored");
            if let Some(cb) = &self.options.callbacks.on_online {
                cb();
            }
        }
    }

    fn report_error(&self, result: &mut SyncResult, error: &Error) {
        result.success = false;
        result.errors.push(error.to_string());
        if let Some(cb) = &self.options.callbacks.on_error {
            cb(error);
        }
    }

    /// One end-to-end replication pass.
    pub(super) async fn cycle(&mut self) -> SyncResult {
        let started = std::time::Instant::now();
        self.shared.syncing.store(true, Ordering::Release);
        let mut result = SyncResult::new(Utc::now());

        // Probe connectivity before touching any table.
        if let Err(e) = self.remote.get("SELECT 1", &Params::Empty).await {
            self.mark_offline();
            result.success = false;
            result.errors.push(format!("remote unreachable: {e}"));
            self.finish(&mut result, started);
            return result;
        }
        self.mark_online();

        if let Err(e) = self.enforce_budget().await {
            self.report_error(&mut result, &e);
            self.finish(&mut result, started);
            return result;
        }

        let tables = self.options.ordered_tables();
        let total = tables.len();
        for (index, table) in tables.iter().enumerate() {
            if self.shared.cancel.load(Ordering::Acquire) {
                result.success = false;
                result.errors.push("cycle aborted".to_string());
                break;
            }
            if let Some(cb) = &self.options.callbacks.on_progress {
                cb(&SyncProgress {
                    table: table.name.clone(),
                    index,
                    total,
                });
            }
            if let Err(e) = self.sync_table(table, &mut result).await {
                self.report_error(&mut result, &e);
            }
        }

        self.finish(&mut result, started);
        result
    }

    fn finish(&self, result: &mut SyncResult, started: std::time::Instant) {
        result.duration_ms = started.elapsed().as_millis() as u64;
        if result.success {
            *self.shared.last_sync.write() = Some(result.timestamp);
        }
        self.shared.syncing.store(false, Ordering::Release);
        info!(
            success = result.success,
            records = result.records_synced,
            conflicts = result.conflicts.len(),
            duration_ms = result.duration_ms,
            "sync cycle finished"
        );
        if let Some(cb) = &self.options.callbacks.on_sync {
            cb(result);
        }
    }

    /// Replicates one table in both configured directions and verifies
    /// the row counts afterwards.
    async fn sync_table(
        &mut self,
        table: &TableSyncOptions,
        result: &mut SyncResult,
    ) -> Result<()> {
        let select = format!("SELECT * FROM \"{}\"", table.name);
        let local_rows = self.primary.all(&select, &Params::Empty).await?;
        let remote_rows = self.remote.all(&select, &Params::Empty).await?;

        let local_map = self.collect_records(&table.name, local_rows, result);
        let remote_map = self.collect_records(&table.name, remote_rows, result);

        let mut high_water = self
            .high_water
            .get(&table.name)
            .copied();
        for record in local_map.values().chain(remote_map.values()) {
            if high_water.is_none_or(|hw| record.updated_at > hw) {
                high_water = Some(record.updated_at);
            }
        }

        // Ids whose local row was just replaced by the remote side; their
        // pre-pull state must not be pushed back.
        let mut overwritten: HashSet<String> = HashSet::new();

        if self.options.direction.includes_pull() {
            for (id, remote_rec) in &remote_map {
                match local_map.get(id) {
                    None => {
                        let (sql, params) = upsert(&table.name, &remote_rec.row);
                        self.primary.run(&sql, &params).await?;
                        result.records_synced += 1;
                    }
                    Some(local_rec) if local_rec.updated_at != remote_rec.updated_at => {
                        let outcome = match conflict::resolve(
                            self.options.strategy,
                            self.options.merge.as_ref(),
                            &table.name,
                            local_rec,
                            remote_rec,
                        ) {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                self.report_error(result, &e);
                                continue;
                            }
                        };
                        match &outcome {
                            Outcome::KeepLocal => {}
                            Outcome::ApplyRemote => {
                                let (sql, params) = upsert(&table.name, &remote_rec.row);
                                self.primary.run(&sql, &params).await?;
                                overwritten.insert(id.clone());
                                result.records_synced += 1;
                            }
                            Outcome::ApplyMerged(row) => {
                                let (sql, params) = upsert(&table.name, row);
                                self.primary.run(&sql, &params).await?;
                                overwritten.insert(id.clone());
                                result.records_synced += 1;
                            }
                            Outcome::InsertBoth(copy) => {
                                let (sql, params) = upsert(&table.name, &copy.row);
                                self.primary.run(&sql, &params).await?;
                                result.records_synced += 1;
                            }
                        }
                        let conflict = SyncConflict {
                            table: table.name.clone(),
                            id: id.clone(),
                            local: local_rec.row.clone(),
                            remote: remote_rec.row.clone(),
                            resolution: outcome.label().to_string(),
                        };
                        if let Some(cb) = &self.options.callbacks.on_conflict {
                            cb(&conflict);
                        }
                        result.conflicts.push(conflict);
                    }
                    Some(_) => {}
                }
            }
        }

        if self.options.direction.includes_push() {
            let since = self.high_water.get(&table.name).copied();
            for (id, local_rec) in &local_map {
                if overwritten.contains(id) {
                    continue;
                }
                if since.is_none_or(|s| local_rec.updated_at > s) {
                    let (sql, params) = upsert(&table.name, &local_rec.row);
                    self.remote.run(&sql, &params).await?;
                    result.records_synced += 1;
                }
            }
        }

        if let Some(max) = table.max_records {
            self.trim_table(&table.name, max).await?;
        }

        if let Some(hw) = high_water {
            self.high_water.insert(table.name.clone(), hw);
        }

        self.verify_table(&table.name).await
    }

    /// Extracts records, recording a diagnostic for every malformed row.
    fn collect_records(
        &self,
        table: &str,
        rows: Vec<crate::types::Row>,
        result: &mut SyncResult,
    ) -> BTreeMap<String, SyncRecord> {
        let mut map = BTreeMap::new();
        for row in rows {
            match SyncRecord::extract(table, row) {
                Ok(record) => {
                    map.insert(record.id.clone(), record);
                }
                Err(e) => {
                    warn!(table, error = %e, "skipping malformed record");
                    result.errors.push(e.to_string());
                }
            }
        }
        map
    }

    async fn count(&self, side: &Storage, table: &str) -> Result<u64> {
        let row = side
            .get(&format!("SELECT count(*) AS n FROM \"{table}\""), &Params::Empty)
            .await?;
        Ok(row
            .and_then(|r| r.get("n").and_then(|v| v.as_integer()))
            .unwrap_or(0) as u64)
    }

    /// Compares row counts on both sides. Strict mode fails the cycle on
    /// a mismatch; otherwise the discrepancy is only logged.
    async fn verify_table(&self, table: &str) -> Result<()> {
        let local = self.count(&self.primary, table).await?;
        let remote = self.count(&self.remote, table).await?;
        if local != remote {
            if self.options.strict_verification {
                return Err(Error::VerificationFailed {
                    table: table.to_string(),
                    local,
                    remote,
                });
            }
            warn!(table, local, remote, "row counts diverge after sync");
        }
        Ok(())
    }

    /// Deletes the oldest rows beyond the per-table cap.
    async fn trim_table(&self, table: &str, max: u64) -> Result<()> {
        let count = self.count(&self.primary, table).await?;
        if count <= max {
            return Ok(());
        }
        let excess = count - max;
        let sql = format!(
            "DELETE FROM \"{table}\" WHERE \"id\" IN \
             (SELECT \"id\" FROM \"{table}\" ORDER BY \"updated_at\" ASC LIMIT ?)"
        );
        let deleted = self
            .primary
            .run(&sql, &Params::single(excess as i64))
            .await?;
        debug!(table, deleted = deleted.changes, "trimmed to record cap");
        Ok(())
    }

    /// Applies the configured storage budget to the primary.
    async fn enforce_budget(&mut self) -> Result<()> {
        let Some(limit_mb) = self.options.storage_limit_mb else {
            return Ok(());
        };
        let limit = limit_mb * 1024 * 1024;
        let used = self.measure_usage().await?;
        if used <= limit {
            return Ok(());
        }
        match self.options.limit_action {
            BudgetAction::Warn => {
                warn!(used, limit, "storage budget exceeded");
                if let Some(cb) = &self.options.callbacks.on_error {
                    cb(&Error::BudgetExceeded { used, limit });
                }
                Ok(())
            }
            BudgetAction::Error => Err(Error::BudgetExceeded { used, limit }),
            BudgetAction::Prune => self.prune_to_budget(limit).await,
        }
    }

    /// On-disk bytes where the backend exposes a file, otherwise a
    /// per-row surrogate over the synchronized tables.
    async fn measure_usage(&self) -> Result<u64> {
        if self.primary.kind() == AdapterKind::Native {
            let path = self.primary.context().descriptor;
            if path != ":memory:"
                && !path.starts_with("file:")
                && let Ok(meta) = std::fs::metadata(&path)
            {
                return Ok(meta.len());
            }
        }
        let mut rows = 0u64;
        for table in self.options.ordered_tables() {
            rows += self.count(&self.primary, &table.name).await?;
        }
        Ok(rows * ESTIMATED_ROW_BYTES)
    }

    /// Deletes the oldest records, lowest-priority tables first, until the
    /// measured usage fits the budget or nothing is left to delete.
    async fn prune_to_budget(&mut self, limit: u64) -> Result<()> {
        let mut tables = self.options.ordered_tables();
        tables.reverse();
        loop {
            if self.measure_usage().await? <= limit {
                return Ok(());
            }
            let mut deleted_any = false;
            for table in &tables {
                let sql = format!(
                    "DELETE FROM \"{0}\" WHERE \"id\" IN \
                     (SELECT \"id\" FROM \"{0}\" ORDER BY \"updated_at\" ASC LIMIT {PRUNE_BATCH})",
                    table.name
                );
                let deleted = self.primary.run(&sql, &Params::Empty).await?;
                if deleted.changes > 0 {
                    debug!(table = %table.name, deleted = deleted.changes, "pruned for budget");
                    deleted_any = true;
                    break;
                }
            }
            if !deleted_any {
                warn!(limit, "budget still exceeded with nothing left to prune");
                return Ok(());
            }
        }
    }
}
