//! Redb-backed KV storage.
//!
//! One redb database file holds one named table; a single-key put commits
//! through redb's write transaction, so snapshot writes are atomic.

use super::backend::KvBackend;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

/// Durable key-value backend over a redb database file.
///
/// `RedbKv` is `Clone`; clones share the same database handle. The table
/// name is chosen at open time, so several logical collections can live in
/// separate files without colliding.
#[derive(Clone)]
pub struct RedbKv {
    db: Arc<Database>,
    table: Arc<str>,
}

impl RedbKv {
    /// Opens or creates a redb database at `path` with the named table.
    ///
    /// Creates parent directories if needed and materializes the table so
    /// the first read does not fail on a missing definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the database
    /// cannot be opened, or the initialization transaction fails.
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create KV directory: {}", parent.display()))?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open KV database: {}", path.display()))?;

        let store = Self {
            db: Arc::new(db),
            table: Arc::from(table),
        };

        let write_txn = store
            .db
            .begin_write()
            .context("Failed to begin initialization transaction")?;
        {
            let _table = write_txn
                .open_table(store.definition())
                .context("Failed to initialize KV table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initialization transaction")?;

        Ok(store)
    }

    fn definition(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.table)
    }

    fn get_sync(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(self.definition())
            .context("Failed to open KV table")?;
        let result = table
            .get(key)
            .with_context(|| format!("Failed to read key '{key}'"))?;
        Ok(result.map(|guard| guard.value().to_vec()))
    }

    fn put_sync(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(self.definition())
                .context("Failed to open KV table")?;
            table
                .insert(key, value)
                .with_context(|| format!("Failed to insert key '{key}'"))?;
        }
        write_txn.commit().context("Failed to commit put transaction")?;
        Ok(())
    }

    fn delete_sync(&self, key: &str) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let removed = {
            let mut table = write_txn
                .open_table(self.definition())
                .context("Failed to open KV table")?;
            table
                .remove(key)
                .with_context(|| format!("Failed to remove key '{key}'"))?
                .is_some()
        };
        write_txn
            .commit()
            .context("Failed to commit delete transaction")?;
        Ok(removed)
    }

    fn list_sync(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(self.definition())
            .context("Failed to open KV table")?;

        let mut keys = Vec::new();
        for item in table.iter().context("Failed to iterate KV table")? {
            let (key, _) = item.context("Failed to read KV entry")?;
            let key_str = key.value();
            if let Some(prefix) = prefix
                && !key_str.starts_with(prefix)
            {
                continue;
            }
            keys.push(key_str.to_string());
        }
        Ok(keys)
    }
}

#[async_trait]
impl KvBackend for RedbKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let backend = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || backend.get_sync(&key))
            .await
            .context("Task join error")?
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let backend = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || backend.put_sync(&key, &value))
            .await
            .context("Task join error")?
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let backend = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || backend.delete_sync(&key))
            .await
            .context("Task join error")?
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let backend = self.clone();
        let prefix = prefix.map(std::string::ToString::to_string);
        tokio::task::spawn_blocking(move || backend.list_sync(prefix.as_deref()))
            .await
            .context("Task join error")?
    }
}
