//! Periodic database backups into an object store.
//!
//! The store itself is a four-method plug-in; anything S3-shaped fits.
//! The manager exports the primary handle through the dump module as a
//! JSON document or a SQL script, optionally gzip-compresses the payload,
//! writes it under a timestamped key and prunes old backups beyond the
//! retention count.

use crate::dump;
use crate::error::{Error, Result};
use crate::service::Storage;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Object storage plug-in.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Writes an object, overwriting any existing one.
    async fn upload(&self, key: &str, data: Vec<u8>) -> anyhow::Result<()>;

    /// Reads an object.
    async fn download(&self, key: &str) -> anyhow::Result<Vec<u8>>;

    /// Lists keys under an optional prefix, lexicographically sorted.
    async fn list(&self, prefix: Option<&str>) -> anyhow::Result<Vec<String>>;

    /// Deletes an object. Missing keys are not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// In-memory object store for tests and ephemeral hosts.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, data: Vec<u8>) -> anyhow::Result<()> {
        self.objects.lock().insert(key.to_string(), data);
        Ok(())
    }

    async fn download(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .with_context(|| format!("no object under key '{key}'"))
    }

    async fn list(&self, prefix: Option<&str>) -> anyhow::Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .keys()
            .filter(|k| prefix.is_none_or(|p| k.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().remove(key);
        Ok(())
    }
}

/// Serialization format of a backup payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupFormat {
    /// JSON document with schema and row lists.
    #[default]
    Json,
    /// SQL dump script.
    Sql,
}

impl BackupFormat {
    fn extension(self) -> &'static str {
        match self {
            BackupFormat::Json => "json",
            BackupFormat::Sql => "sql",
        }
    }
}

/// Backup manager configuration.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Key prefix; keys are `<prefix>backup[-<stamp>].<ext>[.gz]`.
    pub prefix: String,
    /// Payload format.
    pub format: BackupFormat,
    /// Gzip the payload.
    pub compress: bool,
    /// Stamp each key so backups accumulate; unstamped keys overwrite.
    pub timestamped: bool,
    /// Backups retained before the oldest are pruned.
    pub retention: usize,
    /// Automatic backup interval; `None` means manual only.
    pub interval: Option<Duration>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            format: BackupFormat::default(),
            compress: false,
            timestamped: true,
            retention: 5,
            interval: None,
        }
    }
}

/// Periodically exports a storage handle into an object store.
pub struct BackupManager {
    db: Storage,
    store: Arc<dyn ObjectStore>,
    options: BackupOptions,
    timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BackupManager {
    /// Creates the manager and, when an interval is configured, starts
    /// the periodic backup task.
    pub fn new(db: Storage, store: Arc<dyn ObjectStore>, options: BackupOptions) -> Arc<Self> {
        let manager = Arc::new(Self {
            db,
            store,
            options,
            timer: Mutex::new(None),
        });
        if let Some(interval) = manager.options.interval {
            let periodic = Arc::clone(&manager);
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = periodic.run_backup().await {
                        warn!(error = %e, "periodic backup failed");
                    }
                }
            });
            *manager.timer.lock() = Some(handle);
        }
        manager
    }

    /// Exports, uploads, and prunes. Returns the written key.
    ///
    /// # Errors
    ///
    /// Returns an error if the export, compression or upload fails.
    pub async fn run_backup(&self) -> Result<String> {
        let payload = match self.options.format {
            BackupFormat::Json => {
                let document = dump::export_document(&self.db).await?;
                serde_json::to_vec_pretty(&document)
                    .map_err(|e| Error::backend(self.db.kind(), e))?
            }
            BackupFormat::Sql => dump::export_script(&self.db).await?.into_bytes(),
        };

        let payload = if self.options.compress {
            gzip(&payload).map_err(|e| Error::backend(self.db.kind(), e))?
        } else {
            payload
        };

        let key = self.backup_key();
        self.store
            .upload(&key, payload)
            .await
            .map_err(|e| Error::backend(self.db.kind(), e))?;
        info!(key = %key, "backup written");

        self.prune_old().await?;
        Ok(key)
    }

    /// Stops the periodic task, if any.
    pub fn close(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }

    fn backup_key(&self) -> String {
        let stamp = if self.options.timestamped {
            format!("-{}", Utc::now().format("%Y-%m-%dT%H-%M-%SZ"))
        } else {
            String::new()
        };
        let gz = if self.options.compress { ".gz" } else { "" };
        format!(
            "{}backup{stamp}.{}{gz}",
            self.options.prefix,
            self.options.format.extension()
        )
    }

    /// Deletes the lexicographically oldest keys beyond the retention
    /// count.
    async fn prune_old(&self) -> Result<()> {
        let mut keys = self
            .store
            .list(Some(&self.options.prefix))
            .await
            .map_err(|e| Error::backend(self.db.kind(), e))?;
        keys.sort();
        if keys.len() <= self.options.retention {
            return Ok(());
        }
        let excess = keys.len() - self.options.retention;
        for key in keys.into_iter().take(excess) {
            debug!(key = %key, "pruning old backup");
            self.store
                .delete(&key)
                .await
                .map_err(|e| Error::backend(self.db.kind(), e))?;
        }
        Ok(())
    }
}

impl Drop for BackupManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn gzip(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use flate2::read::GzDecoder;
    use std::io::Read;

    async fn seeded() -> Storage {
        let db = Storage::memory().await.unwrap();
        db.exec("CREATE TABLE t (id TEXT PRIMARY KEY, v INTEGER)")
            .await
            .unwrap();
        db.run("INSERT INTO t VALUES ('a', 1)", &Params::Empty)
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn backup_writes_json_under_prefixed_key() {
        let db = seeded().await;
        let store = Arc::new(MemoryObjectStore::new());
        let manager = BackupManager::new(
            db,
            store.clone(),
            BackupOptions {
                prefix: "app/".to_string(),
                timestamped: false,
                ..BackupOptions::default()
            },
        );

        let key = manager.run_backup().await.unwrap();
        assert_eq!(key, "app/backup.json");

        let payload = store.download(&key).await.unwrap();
        let document: dump::DumpDocument = serde_json::from_slice(&payload).unwrap();
        assert_eq!(document.tables[0].name, "t");
    }

    #[tokio::test]
    async fn compressed_backup_gunzips_to_the_document() {
        let db = seeded().await;
        let store = Arc::new(MemoryObjectStore::new());
        let manager = BackupManager::new(
            db,
            store.clone(),
            BackupOptions {
                compress: true,
                timestamped: false,
                ..BackupOptions::default()
            },
        );

        let key = manager.run_backup().await.unwrap();
        assert!(key.ends_with(".json.gz"));

        let payload = store.download(&key).await.unwrap();
        let mut decoder = GzDecoder::new(payload.as_slice());
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        assert!(decompressed.contains("\"t\""));
    }

    #[tokio::test]
    async fn retention_prunes_oldest_keys_first() {
        let db = seeded().await;
        let store = Arc::new(MemoryObjectStore::new());
        for i in 0..4 {
            store
                .upload(&format!("backup-2026-01-0{}T00-00-00Z.json", i + 1), vec![])
                .await
                .unwrap();
        }
        let manager = BackupManager::new(
            db,
            store.clone(),
            BackupOptions {
                retention: 3,
                timestamped: true,
                ..BackupOptions::default()
            },
        );

        manager.run_backup().await.unwrap();

        let keys = store.list(None).await.unwrap();
        assert_eq!(keys.len(), 3);
        assert!(!keys.contains(&"backup-2026-01-01T00-00-00Z.json".to_string()));
        assert!(!keys.contains(&"backup-2026-01-02T00-00-00Z.json".to_string()));
    }

    #[tokio::test]
    async fn sql_format_produces_a_script() {
        let db = seeded().await;
        let store = Arc::new(MemoryObjectStore::new());
        let manager = BackupManager::new(
            db,
            store.clone(),
            BackupOptions {
                format: BackupFormat::Sql,
                timestamped: false,
                ..BackupOptions::default()
            },
        );

        let key = manager.run_backup().await.unwrap();
        assert_eq!(key, "backup.sql");
        let script = String::from_utf8(store.download(&key).await.unwrap()).unwrap();
        assert!(script.contains("CREATE TABLE t"));
    }
}
