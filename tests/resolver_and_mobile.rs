//! Resolution fallback and the host-plugin adapter driven end to end.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use unistore::adapter::{MobileOptions, MobilePlugin, PluginRunResult};
use unistore::resolver::resolve_with_override;
use unistore::{AdapterKind, NativeOptions, Params, Row, Storage, StorageConfig, Value};

/// Test plugin hosting named in-memory engines, the shape a platform
/// SQL plugin exposes.
#[derive(Default)]
struct FakePlugin {
    databases: Mutex<HashMap<String, rusqlite::Connection>>,
}

#[async_trait]
impl MobilePlugin for FakePlugin {
    async fn open_database(&self, name: &str) -> anyhow::Result<()> {
        let mut databases = self.databases.lock();
        if !databases.contains_key(name) {
            databases.insert(name.to_string(), rusqlite::Connection::open_in_memory()?);
        }
        Ok(())
    }

    async fn close_database(&self, name: &str) -> anyhow::Result<()> {
        self.databases.lock().remove(name);
        Ok(())
    }

    async fn execute(
        &self,
        database: &str,
        sql: &str,
        params: &[Value],
    ) -> anyhow::Result<PluginRunResult> {
        let databases = self.databases.lock();
        let conn = databases
            .get(database)
            .ok_or_else(|| anyhow::anyhow!("database '{database}' is not open"))?;
        let before = conn.last_insert_rowid();
        let changes = conn.execute(sql, rusqlite::params_from_iter(params.iter()))?;
        let after = conn.last_insert_rowid();
        Ok(PluginRunResult {
            changes: changes as u64,
            last_insert_row_id: (after != before).then_some(after),
        })
    }

    async fn query(
        &self,
        database: &str,
        sql: &str,
        params: &[Value],
    ) -> anyhow::Result<Vec<Row>> {
        let databases = self.databases.lock();
        let conn = databases
            .get(database)
            .ok_or_else(|| anyhow::anyhow!("database '{database}' is not open"))?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(Value::from(row.get_ref(i)?));
            }
            out.push(Row::new(columns.clone(), values));
        }
        Ok(out)
    }
}

#[tokio::test]
async fn failing_head_falls_back_to_next_candidate() {
    let tmp = tempfile::TempDir::new().unwrap();
    // The path is a directory, so the native open fails.
    let config = StorageConfig::native(NativeOptions::new(tmp.path().display().to_string()))
        .with_priority(vec![AdapterKind::Native, AdapterKind::Wasm]);

    let db = resolve_with_override(config, None).await.unwrap();
    assert_eq!(db.kind(), AdapterKind::Wasm);
    db.close().await.unwrap();
}

#[tokio::test]
async fn env_override_is_attempted_first() {
    let config = StorageConfig::default()
        .with_priority(vec![AdapterKind::Native, AdapterKind::Memory]);
    let db = resolve_with_override(config, Some("memory")).await.unwrap();
    assert_eq!(db.kind(), AdapterKind::Memory);
}

#[tokio::test]
async fn mobile_plugin_resolves_first_when_configured() {
    let plugin: Arc<dyn MobilePlugin> = Arc::new(FakePlugin::default());
    let config = StorageConfig::mobile(MobileOptions::new("app", plugin));

    let db = resolve_with_override(config, None).await.unwrap();
    assert_eq!(db.kind(), AdapterKind::Mobile);

    db.exec("CREATE TABLE t (k TEXT PRIMARY KEY, v INTEGER)")
        .await
        .unwrap();
    let result = db
        .run(
            "INSERT INTO t VALUES (?, ?)",
            &Params::positional(vec![Value::Text("a".into()), Value::Integer(1)]),
        )
        .await
        .unwrap();
    assert_eq!(result.changes, 1);

    let row = db
        .get("SELECT v FROM t WHERE k = ?", &Params::single("a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("v"), Some(&Value::Integer(1)));
    db.close().await.unwrap();
}

#[tokio::test]
async fn mobile_transactions_roll_back() {
    let plugin: Arc<dyn MobilePlugin> = Arc::new(FakePlugin::default());
    let db = Storage::mobile(MobileOptions::new("txdb", plugin))
        .await
        .unwrap();
    db.exec("CREATE TABLE t (v INTEGER)").await.unwrap();

    let _ = db
        .transaction(|t| async move {
            t.run("INSERT INTO t VALUES (1)", &Params::Empty).await?;
            Err::<(), _>(unistore::Error::config("boom"))
        })
        .await;

    let row = db
        .get("SELECT count(*) AS n FROM t", &Params::Empty)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("n"), Some(&Value::Integer(0)));
    db.close().await.unwrap();
}

#[tokio::test]
async fn mobile_rejects_named_parameters() {
    let plugin: Arc<dyn MobilePlugin> = Arc::new(FakePlugin::default());
    let db = Storage::mobile(MobileOptions::new("named", plugin))
        .await
        .unwrap();
    db.exec("CREATE TABLE t (v INTEGER)").await.unwrap();

    let err = db
        .run(
            "INSERT INTO t VALUES (@v)",
            &Params::named(vec![("v", Value::Integer(1))]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, unistore::Error::Bind { .. }));
    db.close().await.unwrap();
}
