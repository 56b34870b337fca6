//! Backend trait for the KV store.

use anyhow::Result;
use async_trait::async_trait;

/// Backend trait for key-value storage.
///
/// All backends must be thread-safe (`Send + Sync`) for use with tokio.
/// A put of a single key is atomic; readers observe either the previous
/// value or the new one, never a torn write.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Retrieves a value by key. Returns `Ok(None)` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Deletes a key. Returns whether the key existed. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Lists all keys matching an optional prefix, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>>;

    /// Releases backend resources. Further calls may fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
