use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use super::EphemeralStore;
use crate::dao::storage::{StorageError, StorageResult};

/// Failures specific to the in-process store.
#[derive(Debug, Error)]
pub enum MemoryStoreError {
    /// A hash command hit a string key or the reverse.
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,
}

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process [`EphemeralStore`] used when no cache service is configured and in tests.
///
/// Expired keys are dropped lazily on access; [`MemoryStore::spawn_sweeper`] additionally
/// reclaims them in the background.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Periodically purge expired keys until the store is dropped.
    pub fn spawn_sweeper(&self, every: Duration) {
        let weak = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(entries) = weak.upgrade() else {
                    break;
                };

                let now = Instant::now();
                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired(now));
                let purged = before.saturating_sub(entries.len());
                if purged > 0 {
                    debug!(purged, "swept expired ephemeral keys");
                }
            }
        });
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    fn read_text(&self, key: &str) -> StorageResult<Option<String>> {
        self.purge_if_expired(key);
        match self.entries.get(key).map(|entry| entry.value.clone()) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text)),
            Some(Value::Hash(_)) => Err(wrong_type(key)),
        }
    }

    fn write_text(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Text(value),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    /// Run `f` against the hash stored at `key`, creating it when `create` is set.
    fn with_hash<T>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut HashMap<String, String>) -> T,
    ) -> StorageResult<Option<T>> {
        self.purge_if_expired(key);
        let mut entry = match self.entries.get_mut(key) {
            Some(entry) => entry,
            None if create => self.entries.entry(key.to_owned()).or_insert(Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            }),
            None => return Ok(None),
        };

        let outcome = match &mut entry.value {
            Value::Hash(hash) => f(hash),
            Value::Text(_) => return Err(wrong_type(key)),
        };

        let emptied = matches!(&entry.value, Value::Hash(hash) if hash.is_empty());
        drop(entry);
        if emptied {
            self.entries
                .remove_if(key, |_, entry| matches!(&entry.value, Value::Hash(h) if h.is_empty()));
        }

        Ok(Some(outcome))
    }

    fn remove(&self, key: &str) -> bool {
        self.purge_if_expired(key);
        self.entries.remove(key).is_some()
    }

    fn touch(&self, key: &str, ttl: Duration) -> bool {
        self.purge_if_expired(key);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::unavailable(format!("key `{key}`"), MemoryStoreError::WrongType)
}

impl EphemeralStore for MemoryStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let result = self.read_text(key);
        Box::pin(async move { result })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        self.write_text(key, value, None);
        Box::pin(async move { Ok(()) })
    }

    fn set_ex(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write_text(key, value, Some(ttl));
        Box::pin(async move { Ok(()) })
    }

    fn del(&self, key: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let removed = self.remove(key);
        Box::pin(async move { Ok(removed) })
    }

    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<bool>> {
        let touched = self.touch(key, ttl);
        Box::pin(async move { Ok(touched) })
    }

    fn hget(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let result = self
            .with_hash(key, false, |hash| hash.get(field).cloned())
            .map(Option::flatten);
        Box::pin(async move { result })
    }

    fn hset(&self, key: &str, field: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let result = self
            .with_hash(key, true, |hash| {
                hash.insert(field.to_owned(), value);
            })
            .map(|_| ());
        Box::pin(async move { result })
    }

    fn hset_nx(
        &self,
        key: &str,
        field: &str,
        value: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let result = self
            .with_hash(key, true, |hash| {
                if hash.contains_key(field) {
                    false
                } else {
                    hash.insert(field.to_owned(), value);
                    true
                }
            })
            .map(|created| created.unwrap_or(false));
        Box::pin(async move { result })
    }

    fn hdel(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let result = self
            .with_hash(key, false, |hash| hash.remove(field).is_some())
            .map(|removed| removed.unwrap_or(false));
        Box::pin(async move { result })
    }

    fn hdel_if_eq(
        &self,
        key: &str,
        field: &str,
        expected: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let result = self
            .with_hash(key, false, |hash| {
                if hash.get(field).map(String::as_str) == Some(expected) {
                    hash.remove(field);
                    true
                } else {
                    false
                }
            })
            .map(|removed| removed.unwrap_or(false));
        Box::pin(async move { result })
    }

    fn hgetall(&self, key: &str) -> BoxFuture<'static, StorageResult<HashMap<String, String>>> {
        let result = self
            .with_hash(key, false, |hash| hash.clone())
            .map(Option::unwrap_or_default);
        Box::pin(async move { result })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_keys_read_as_missing() {
        let store = MemoryStore::new();
        store
            .set_ex("practice:1", "{}".into(), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(store.get("practice:1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("practice:1").await.unwrap().is_none());
        assert!(!store.del("practice:1").await.unwrap());
    }

    #[tokio::test]
    async fn hset_nx_only_creates_missing_fields() {
        let store = MemoryStore::new();
        assert!(store.hset_nx("h", "a", "1".into()).await.unwrap());
        assert!(!store.hset_nx("h", "a", "2".into()).await.unwrap());
        assert_eq!(store.hget("h", "a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn hdel_if_eq_compares_before_deleting() {
        let store = MemoryStore::new();
        store.hset("ptr", "u1", "conn-b".into()).await.unwrap();

        assert!(!store.hdel_if_eq("ptr", "u1", "conn-a").await.unwrap());
        assert_eq!(store.hget("ptr", "u1").await.unwrap().as_deref(), Some("conn-b"));

        assert!(store.hdel_if_eq("ptr", "u1", "conn-b").await.unwrap());
        assert!(store.hget("ptr", "u1").await.unwrap().is_none());
        assert!(!store.hdel_if_eq("ptr", "u1", "conn-b").await.unwrap());
    }

    #[tokio::test]
    async fn hash_operations_on_text_keys_fail() {
        let store = MemoryStore::new();
        store.set("plain", "value".into()).await.unwrap();
        assert!(store.hget("plain", "field").await.is_err());
    }

    #[tokio::test]
    async fn expire_applies_to_hashes() {
        let store = MemoryStore::new();
        store.hset("h", "a", "1".into()).await.unwrap();
        assert!(store.expire("h", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.hgetall("h").await.unwrap().is_empty());
    }
}
