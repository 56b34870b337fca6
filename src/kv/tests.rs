//! Tests for the KV store module.

use super::*;
use tempfile::TempDir;

#[tokio::test]
async fn put_and_get_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.redb");
    let store = KvStore::file(&db_path, "kv").unwrap();

    store.put("key1", b"value1".to_vec()).await.unwrap();
    let value = store.get("key1").await.unwrap().unwrap();
    assert_eq!(value, b"value1");
}

#[tokio::test]
async fn get_nonexistent_key_is_none() {
    let tmp = TempDir::new().unwrap();
    let store = KvStore::file(tmp.path().join("test.redb"), "kv").unwrap();

    assert!(store.get("nonexistent").await.unwrap().is_none());
}

#[tokio::test]
async fn overwrite_replaces_value() {
    let tmp = TempDir::new().unwrap();
    let store = KvStore::file(tmp.path().join("test.redb"), "kv").unwrap();

    store.put("key1", b"value1".to_vec()).await.unwrap();
    store.put("key1", b"value2".to_vec()).await.unwrap();
    assert_eq!(store.get("key1").await.unwrap().unwrap(), b"value2");
}

#[tokio::test]
async fn delete_reports_prior_existence() {
    let tmp = TempDir::new().unwrap();
    let store = KvStore::file(tmp.path().join("test.redb"), "kv").unwrap();

    store.put("key1", b"value1".to_vec()).await.unwrap();
    assert!(store.delete("key1").await.unwrap());
    assert!(!store.delete("key1").await.unwrap());
    assert!(store.get("key1").await.unwrap().is_none());
}

#[tokio::test]
async fn list_keys_filters_by_prefix() {
    let tmp = TempDir::new().unwrap();
    let store = KvStore::file(tmp.path().join("test.redb"), "kv").unwrap();

    store.put("user:1", b"alice".to_vec()).await.unwrap();
    store.put("user:2", b"bob".to_vec()).await.unwrap();
    store.put("session:abc", b"xyz".to_vec()).await.unwrap();

    let user_keys = store.list_keys(Some("user:")).await.unwrap();
    assert_eq!(user_keys, vec!["user:1".to_string(), "user:2".to_string()]);

    let all = store.list_keys(None).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn value_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("persist.redb");

    {
        let store = KvStore::file(&db_path, "kv").unwrap();
        store.put("db", vec![1, 2, 3, 4]).await.unwrap();
    }

    let reopened = KvStore::file(&db_path, "kv").unwrap();
    assert_eq!(reopened.get("db").await.unwrap().unwrap(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn memory_backend_matches_semantics() {
    let store = KvStore::memory();
    store.put("k", b"v".to_vec()).await.unwrap();
    assert!(store.get("k").await.unwrap().is_some());
    assert!(store.delete("k").await.unwrap());
    assert!(store.list_keys(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn binary_payloads_roundtrip_exactly() {
    let store = KvStore::memory();
    let payload: Vec<u8> = (0..=255).collect();
    store.put("blob", payload.clone()).await.unwrap();
    assert_eq!(store.get("blob").await.unwrap().unwrap(), payload);
}
