//! Sync manager replication scenarios over two in-memory handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use unistore::sync::{
    BudgetAction, ConflictStrategy, SyncCallbacks, SyncDirection, SyncManager, SyncMode,
    SyncOptions, TablePriority, TableSyncOptions,
};
use unistore::{Params, Storage, Value};

const SCHEMA: &str = "CREATE TABLE notes (id TEXT PRIMARY KEY, v TEXT, updated_at INTEGER)";

async fn pair() -> (Storage, Storage) {
    let primary = Storage::memory().await.unwrap();
    let remote = Storage::memory().await.unwrap();
    primary.exec(SCHEMA).await.unwrap();
    remote.exec(SCHEMA).await.unwrap();
    (primary, remote)
}

async fn insert(db: &Storage, id: &str, v: &str, stamp: i64) {
    db.run(
        "INSERT OR REPLACE INTO notes VALUES (?, ?, ?)",
        &Params::positional(vec![
            Value::Text(id.into()),
            Value::Text(v.into()),
            Value::Integer(stamp),
        ]),
    )
    .await
    .unwrap();
}

async fn note(db: &Storage, id: &str) -> Option<(String, i64)> {
    db.get(
        "SELECT v, updated_at FROM notes WHERE id = ?",
        &Params::single(id),
    )
    .await
    .unwrap()
    .map(|row| {
        (
            row.get("v").unwrap().as_text().unwrap().to_string(),
            row.get("updated_at").unwrap().as_integer().unwrap(),
        )
    })
}

async fn count(db: &Storage) -> i64 {
    db.get("SELECT count(*) AS n FROM notes", &Params::Empty)
        .await
        .unwrap()
        .unwrap()
        .get("n")
        .unwrap()
        .as_integer()
        .unwrap()
}

fn options() -> SyncOptions {
    SyncOptions::default().table(TableSyncOptions::new("notes"))
}

#[tokio::test]
async fn last_write_wins_prefers_newer_and_reports_conflict() {
    let (primary, remote) = pair().await;
    insert(&primary, "r1", "L", 10).await;
    insert(&remote, "r1", "R", 20).await;

    let manager = SyncManager::new(primary.clone(), remote, options());
    let result = manager.sync().await.unwrap();

    assert!(result.success);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].resolution, "remote");
    assert_eq!(note(&primary, "r1").await, Some(("R".into(), 20)));
    manager.close().await;
}

#[tokio::test]
async fn last_write_wins_pushes_newer_local_to_remote() {
    let (primary, remote) = pair().await;
    insert(&primary, "r1", "L", 30).await;
    insert(&remote, "r1", "R", 20).await;

    let manager = SyncManager::new(primary.clone(), remote.clone(), options());
    let result = manager.sync().await.unwrap();

    assert_eq!(result.conflicts[0].resolution, "local");
    assert_eq!(note(&primary, "r1").await, Some(("L".into(), 30)));
    assert_eq!(note(&remote, "r1").await, Some(("L".into(), 30)));
    manager.close().await;
}

#[tokio::test]
async fn missing_remote_rows_are_pulled_and_local_pushed() {
    let (primary, remote) = pair().await;
    insert(&primary, "p1", "local-only", 5).await;
    insert(&remote, "q1", "remote-only", 6).await;

    let manager = SyncManager::new(primary.clone(), remote.clone(), options());
    let result = manager.sync().await.unwrap();

    assert!(result.success);
    assert!(result.conflicts.is_empty());
    assert_eq!(count(&primary).await, 2);
    assert_eq!(count(&remote).await, 2);
    manager.close().await;
}

#[tokio::test]
async fn equal_stamps_are_already_converged() {
    let (primary, remote) = pair().await;
    insert(&primary, "r1", "L", 10).await;
    insert(&remote, "r1", "R", 10).await;

    let manager = SyncManager::new(primary.clone(), remote, options());
    let result = manager.sync().await.unwrap();

    assert!(result.conflicts.is_empty());
    assert_eq!(note(&primary, "r1").await, Some(("L".into(), 10)));
    manager.close().await;
}

#[tokio::test]
async fn keep_both_grows_the_table_by_the_conflict_count() {
    let (primary, remote) = pair().await;
    insert(&primary, "r1", "L", 10).await;
    insert(&remote, "r1", "R", 20).await;
    insert(&primary, "r2", "L2", 11).await;
    insert(&remote, "r2", "R2", 21).await;

    let before = count(&primary).await;
    let mut opts = options();
    opts.strategy = ConflictStrategy::KeepBoth;
    let manager = SyncManager::new(primary.clone(), remote, opts);
    let result = manager.sync().await.unwrap();

    assert_eq!(result.conflicts.len(), 2);
    assert_eq!(count(&primary).await, before + 2);
    assert_eq!(note(&primary, "r1~remote").await, Some(("R".into(), 20)));
    manager.close().await;
}

#[tokio::test]
async fn merge_strategy_applies_the_user_function() {
    let (primary, remote) = pair().await;
    insert(&primary, "r1", "L", 10).await;
    insert(&remote, "r1", "R", 20).await;

    let mut opts = options();
    opts.strategy = ConflictStrategy::Merge;
    opts.merge = Some(Arc::new(|local, remote| {
        let mut merged = remote.clone();
        let combined = format!(
            "{}+{}",
            local.get("v").unwrap().as_text().unwrap(),
            remote.get("v").unwrap().as_text().unwrap()
        );
        merged.set("v", Value::Text(combined));
        Ok(merged)
    }));

    let manager = SyncManager::new(primary.clone(), remote, opts);
    let result = manager.sync().await.unwrap();

    assert_eq!(result.conflicts[0].resolution, "merged");
    assert_eq!(note(&primary, "r1").await, Some(("L+R".into(), 20)));
    manager.close().await;
}

#[tokio::test]
async fn merge_without_function_records_an_error() {
    let (primary, remote) = pair().await;
    insert(&primary, "r1", "L", 10).await;
    insert(&remote, "r1", "R", 20).await;

    let mut opts = options();
    opts.strategy = ConflictStrategy::Merge;
    let manager = SyncManager::new(primary.clone(), remote, opts);
    let result = manager.sync().await.unwrap();

    assert!(!result.success);
    assert!(result.errors.iter().any(|e| e.contains("unresolvable")));
    assert_eq!(note(&primary, "r1").await, Some(("L".into(), 10)));
    manager.close().await;
}

#[tokio::test]
async fn pull_only_never_writes_to_remote() {
    let (primary, remote) = pair().await;
    insert(&primary, "p1", "local-only", 5).await;
    insert(&remote, "q1", "remote-only", 6).await;

    let mut opts = options();
    opts.direction = SyncDirection::PullOnly;
    let manager = SyncManager::new(primary.clone(), remote.clone(), opts);
    manager.sync().await.unwrap();

    assert_eq!(count(&primary).await, 2);
    assert_eq!(count(&remote).await, 1);
    manager.close().await;
}

#[tokio::test]
async fn records_without_updated_at_are_diagnosed_not_dropped() {
    let (primary, remote) = pair().await;
    primary
        .run(
            "INSERT INTO notes (id, v, updated_at) VALUES ('bad', 'x', NULL)",
            &Params::Empty,
        )
        .await
        .unwrap();

    let manager = SyncManager::new(primary.clone(), remote, options());
    let result = manager.sync().await.unwrap();

    assert!(
        result
            .errors
            .iter()
            .any(|e| e.contains("updated_at"))
    );
    // The malformed row stays local.
    assert_eq!(count(&primary).await, 1);
    manager.close().await;
}

#[tokio::test]
async fn offline_remote_aborts_the_cycle_and_fires_callback() {
    let (primary, remote) = pair().await;
    remote.close().await.unwrap();

    let offline_seen = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&offline_seen);
    let mut opts = options();
    opts.callbacks = SyncCallbacks {
        on_offline: Some(Arc::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })),
        ..SyncCallbacks::default()
    };

    let manager = SyncManager::new(primary, remote, opts);
    let result = manager.sync().await.unwrap();

    assert!(!result.success);
    assert!(!manager.online());
    assert_eq!(offline_seen.load(Ordering::SeqCst), 1);

    // A second failed probe does not re-fire the transition callback.
    let _ = manager.sync().await.unwrap();
    assert_eq!(offline_seen.load(Ordering::SeqCst), 1);
    manager.close().await;
}

#[tokio::test]
async fn table_priority_orders_the_cycle() {
    let primary = Storage::memory().await.unwrap();
    let remote = Storage::memory().await.unwrap();
    for db in [&primary, &remote] {
        db.exec(
            "CREATE TABLE low_t (id TEXT PRIMARY KEY, updated_at INTEGER);
             CREATE TABLE crit_t (id TEXT PRIMARY KEY, updated_at INTEGER);",
        )
        .await
        .unwrap();
    }

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = Arc::clone(&order);
    let mut opts = SyncOptions::default()
        .table(TableSyncOptions::new("low_t").priority(TablePriority::Low))
        .table(TableSyncOptions::new("crit_t").priority(TablePriority::Critical));
    opts.callbacks = SyncCallbacks {
        on_progress: Some(Arc::new(move |progress| {
            seen.lock().push(progress.table.clone());
        })),
        ..SyncCallbacks::default()
    };

    let manager = SyncManager::new(primary, remote, opts);
    manager.sync().await.unwrap();
    assert_eq!(*order.lock(), vec!["crit_t".to_string(), "low_t".to_string()]);
    manager.close().await;
}

#[tokio::test]
async fn budget_error_action_fails_the_cycle() {
    let (primary, remote) = pair().await;
    for i in 0..64 {
        insert(&primary, &format!("r{i}"), "x", i).await;
    }

    let mut opts = options();
    // 64 surrogate rows exceed a zero budget.
    opts.storage_limit_mb = Some(0);
    opts.limit_action = BudgetAction::Error;
    let manager = SyncManager::new(primary, remote, opts);
    let result = manager.sync().await.unwrap();

    assert!(!result.success);
    assert!(result.errors.iter().any(|e| e.contains("budget")));
    manager.close().await;
}

#[tokio::test]
async fn budget_prune_deletes_until_within_budget() {
    let (primary, remote) = pair().await;
    for i in 0..100 {
        insert(&primary, &format!("r{i:03}"), "x", i).await;
    }

    let mut opts = options();
    // A zero budget forces pruning until the table is empty.
    opts.storage_limit_mb = Some(0);
    opts.limit_action = BudgetAction::Prune;
    let manager = SyncManager::new(primary.clone(), remote, opts);
    let result = manager.sync().await.unwrap();

    assert!(result.success);
    assert_eq!(count(&primary).await, 0);
    manager.close().await;
}

#[tokio::test]
async fn max_records_trims_oldest_rows() {
    let (primary, remote) = pair().await;
    for i in 0..10 {
        insert(&primary, &format!("r{i}"), "x", i).await;
    }

    let opts = SyncOptions::default().table(TableSyncOptions::new("notes").max_records(4));
    let manager = SyncManager::new(primary.clone(), remote, opts);
    manager.sync().await.unwrap();

    assert_eq!(count(&primary).await, 4);
    // The newest stamps survive.
    assert!(note(&primary, "r9").await.is_some());
    assert!(note(&primary, "r0").await.is_none());
    manager.close().await;
}

#[tokio::test]
async fn auto_mode_syncs_after_debounce() {
    let (primary, remote) = pair().await;

    let mut opts = options();
    opts.mode = SyncMode::Auto;
    opts.debounce = Duration::from_millis(50);
    let manager = SyncManager::new(primary.clone(), remote.clone(), opts);

    insert(&primary, "p1", "v", 1).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(count(&remote).await, 1);
    assert!(manager.last_sync().is_some());
    manager.close().await;
}

#[tokio::test]
async fn realtime_mode_syncs_every_mutation() {
    let (primary, remote) = pair().await;

    let mut opts = options();
    opts.mode = SyncMode::Realtime;
    let manager = SyncManager::new(primary.clone(), remote.clone(), opts);

    insert(&primary, "p1", "v", 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count(&remote).await, 1);
    manager.close().await;
}

#[tokio::test]
async fn stop_disables_scheduling_until_start() {
    let (primary, remote) = pair().await;

    let mut opts = options();
    opts.mode = SyncMode::Realtime;
    let manager = SyncManager::new(primary.clone(), remote.clone(), opts);
    manager.stop().await.unwrap();

    insert(&primary, "p1", "v", 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count(&remote).await, 0);

    manager.start().await.unwrap();
    insert(&primary, "p2", "v", 2).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count(&remote).await, 2);
    manager.close().await;
}

#[tokio::test]
async fn sync_callback_reports_the_result() {
    let (primary, remote) = pair().await;
    insert(&primary, "p1", "v", 1).await;

    let synced = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&synced);
    let mut opts = options();
    opts.callbacks = SyncCallbacks {
        on_sync: Some(Arc::new(move |result| {
            if result.success {
                seen.fetch_add(result.records_synced as usize, Ordering::SeqCst);
            }
        })),
        ..SyncCallbacks::default()
    };

    let manager = SyncManager::new(primary, remote, opts);
    manager.sync().await.unwrap();
    assert_eq!(synced.load(Ordering::SeqCst), 1);
    manager.close().await;
}

#[tokio::test]
async fn closed_manager_rejects_commands() {
    let (primary, remote) = pair().await;
    let manager = SyncManager::new(primary, remote, options());
    manager.close().await;
    assert!(manager.sync().await.is_err());
}
