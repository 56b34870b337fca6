//! High-level `KvStore` wrapper over backend implementations.

use super::backend::KvBackend;
use super::memory::MemoryKv;
use super::redb::RedbKv;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// High-level key-value store interface.
///
/// Wraps a `KvBackend` implementation and provides a consistent API
/// regardless of the underlying storage mechanism. `KvStore` is `Clone`
/// and can be shared across tasks.
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn KvBackend>,
}

impl KvStore {
    /// Creates a store backed by a redb database file with a named table.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn file<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        let backend = RedbKv::open(path, table)?;
        Ok(Self {
            backend: Arc::new(backend),
        })
    }

    /// Creates a store backed by an in-memory map.
    pub fn memory() -> Self {
        Self {
            backend: Arc::new(MemoryKv::new()),
        }
    }

    /// Creates a store with a custom backend.
    pub fn custom<B: KvBackend>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Retrieves a value by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.backend.get(key).await
    }

    /// Stores a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.backend.put(key, value).await
    }

    /// Deletes a key, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.backend.delete(key).await
    }

    /// Lists all keys matching an optional prefix, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    pub async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        self.backend.list(prefix).await
    }

    /// Releases backend resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to shut down cleanly.
    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }
}
