use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use redis::{AsyncCommands, Client, RedisError, Script, aio::ConnectionManager};
use thiserror::Error;

use super::EphemeralStore;
use crate::dao::storage::{StorageError, StorageResult};

/// Deletes a hash field only when it still holds the expected value.
const COMPARE_AND_DELETE: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
    return redis.call('HDEL', KEYS[1], ARGV[1])
end
return 0
"#;

/// Result of Redis backend calls.
pub type RedisResult<T> = std::result::Result<T, RedisDaoError>;

/// Failures of the Redis backend.
#[derive(Debug, Error)]
pub enum RedisDaoError {
    /// The connection URL did not parse.
    #[error("failed to parse Redis connection URL `{url}`")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Driver error.
        #[source]
        source: RedisError,
    },
    /// The connection could not be opened.
    #[error("failed to open Redis connection")]
    Connect {
        /// Driver error.
        #[source]
        source: RedisError,
    },
    /// A command failed.
    #[error("Redis command `{command}` failed on `{key}`")]
    Command {
        /// Command name.
        command: &'static str,
        /// Key the command targeted.
        key: String,
        /// Driver error.
        #[source]
        source: RedisError,
    },
    /// `PING` failed.
    #[error("Redis ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: RedisError,
    },
}

impl From<RedisDaoError> for StorageError {
    fn from(err: RedisDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}

/// [`EphemeralStore`] backed by a Redis server through an auto-reconnecting connection manager.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    compare_and_delete: Arc<Script>,
}

impl RedisStore {
    /// Open a managed connection to the Redis server at `url`.
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = Client::open(url).map_err(|source| RedisDaoError::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|source| RedisDaoError::Connect { source })?;

        Ok(Self {
            connection,
            compare_and_delete: Arc::new(Script::new(COMPARE_AND_DELETE)),
        })
    }
}

fn command_error(command: &'static str, key: &str) -> impl FnOnce(RedisError) -> RedisDaoError {
    let key = key.to_owned();
    move |source| RedisDaoError::Command {
        command,
        key,
        source,
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl EphemeralStore for RedisStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let value: Option<String> = conn.get(&key).await.map_err(command_error("GET", &key))?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let _: () = conn
                .set(&key, value)
                .await
                .map_err(command_error("SET", &key))?;
            Ok(())
        })
    }

    fn set_ex(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let _: () = conn
                .set_ex(&key, value, ttl_secs(ttl))
                .await
                .map_err(command_error("SETEX", &key))?;
            Ok(())
        })
    }

    fn del(&self, key: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let removed: i64 = conn.del(&key).await.map_err(command_error("DEL", &key))?;
            Ok(removed > 0)
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<bool>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        let seconds = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        Box::pin(async move {
            let applied: bool = conn
                .expire(&key, seconds)
                .await
                .map_err(command_error("EXPIRE", &key))?;
            Ok(applied)
        })
    }

    fn hget(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        let field = field.to_owned();
        Box::pin(async move {
            let value: Option<String> = conn
                .hget(&key, &field)
                .await
                .map_err(command_error("HGET", &key))?;
            Ok(value)
        })
    }

    fn hset(&self, key: &str, field: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        let field = field.to_owned();
        Box::pin(async move {
            let _: i64 = conn
                .hset(&key, &field, value)
                .await
                .map_err(command_error("HSET", &key))?;
            Ok(())
        })
    }

    fn hset_nx(
        &self,
        key: &str,
        field: &str,
        value: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        let field = field.to_owned();
        Box::pin(async move {
            let created: bool = conn
                .hset_nx(&key, &field, value)
                .await
                .map_err(command_error("HSETNX", &key))?;
            Ok(created)
        })
    }

    fn hdel(&self, key: &str, field: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        let field = field.to_owned();
        Box::pin(async move {
            let removed: i64 = conn
                .hdel(&key, &field)
                .await
                .map_err(command_error("HDEL", &key))?;
            Ok(removed > 0)
        })
    }

    fn hdel_if_eq(
        &self,
        key: &str,
        field: &str,
        expected: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut conn = self.connection.clone();
        let script = self.compare_and_delete.clone();
        let key = key.to_owned();
        let field = field.to_owned();
        let expected = expected.to_owned();
        Box::pin(async move {
            let removed: i64 = script
                .key(&key)
                .arg(&field)
                .arg(&expected)
                .invoke_async(&mut conn)
                .await
                .map_err(command_error("EVALSHA", &key))?;
            Ok(removed > 0)
        })
    }

    fn hgetall(&self, key: &str) -> BoxFuture<'static, StorageResult<HashMap<String, String>>> {
        let mut conn = self.connection.clone();
        let key = key.to_owned();
        Box::pin(async move {
            let values: HashMap<String, String> = conn
                .hgetall(&key)
                .await
                .map_err(command_error("HGETALL", &key))?;
            Ok(values)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mut conn = self.connection.clone();
        Box::pin(async move {
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|source| RedisDaoError::HealthPing { source })?;
            Ok(())
        })
    }
}
