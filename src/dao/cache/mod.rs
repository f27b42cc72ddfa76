/// Key layout of every live-session and practice record.
pub mod keys;
/// In-process backend.
pub mod memory;
/// Redis backend.
#[cfg(feature = "redis-cache")]
pub mod redis_store;

use std::{collections::HashMap, time::Duration};

use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};

use crate::dao::storage::{StorageError, StorageResult};

pub use memory::MemoryStore;

/// Key/value and hash store with per-key TTL. Every operation touches a single key,
/// there are no multi-key transactions.
pub trait EphemeralStore: Send + Sync {
    /// Read a string value.
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Write a string value without expiry.
    fn set(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Write a string value that expires after `ttl`.
    fn set_ex(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Delete a key, returning whether it existed.
    fn del(&self, key: &str) -> BoxFuture<'static, StorageResult<bool>>;
    /// Reset the TTL of an existing key, returning whether it exists.
    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<bool>>;
    /// Read one hash field.
    fn hget(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Write one hash field.
    fn hset(&self, key: &str, field: &str, value: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Set `field` only when absent, returning whether it was created.
    fn hset_nx(
        &self,
        key: &str,
        field: &str,
        value: String,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Delete one hash field, returning whether it existed.
    fn hdel(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<bool>>;
    /// Delete `field` only when it currently holds `expected`, atomically.
    fn hdel_if_eq(
        &self,
        key: &str,
        field: &str,
        expected: &str,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Read every field of a hash; empty when the key is absent.
    fn hgetall(&self, key: &str) -> BoxFuture<'static, StorageResult<HashMap<String, String>>>;
    /// Round-trip to the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Serialize a value for storage, reporting failures against `key`.
pub fn encode<T: Serialize>(key: &str, value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|source| StorageError::corrupted(key, source))
}

/// Decode a stored value, turning malformed payloads into [`StorageError::Corrupted`].
pub fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> StorageResult<T> {
    serde_json::from_str(raw).map_err(|source| StorageError::corrupted(key, source))
}

/// Read and decode a JSON string value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn EphemeralStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => decode(key, &raw).map(Some),
        None => Ok(None),
    }
}

/// Read and decode every field of a JSON hash.
pub async fn hgetall_json<T: DeserializeOwned>(
    store: &dyn EphemeralStore,
    key: &str,
) -> StorageResult<HashMap<String, T>> {
    store
        .hgetall(key)
        .await?
        .into_iter()
        .map(|(field, raw)| {
            let value = decode(&format!("{key}#{field}"), &raw)?;
            Ok((field, value))
        })
        .collect()
}
