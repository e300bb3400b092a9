use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;

pub type KvFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, KvError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv backend error: {0}")]
    Backend(String),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

/// The external key-value capability every stateful part of the bot rides on.
///
/// Values are opaque strings (JSON in practice). A `ttl_seconds` of `None` is
/// only used for the authenticated-user set; every session-flow key carries a
/// TTL so abandoned conversations expire on their own.
pub trait SessionStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>>;
    fn put<'a>(&'a self, key: &'a str, value: &'a str, ttl_seconds: Option<u64>)
    -> KvFuture<'a, ()>;
    fn delete<'a>(&'a self, key: &'a str) -> KvFuture<'a, ()>;

    fn set_add<'a>(&'a self, key: &'a str, member: &'a str) -> KvFuture<'a, ()>;
    fn set_remove<'a>(&'a self, key: &'a str, member: &'a str) -> KvFuture<'a, ()>;
    fn set_members<'a>(&'a self, key: &'a str) -> KvFuture<'a, Vec<String>>;
}

#[derive(Clone)]
pub struct RedisSessionStore {
    connection: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self, KvError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| KvError::Backend(err.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|err| KvError::Backend(err.to_string()))?;

        let mut health_connection = connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut health_connection)
            .await
            .map_err(|err| KvError::Backend(format!("failed to connect to redis: {err}")))?;

        Ok(Self { connection })
    }
}

impl SessionStore for RedisSessionStore {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        let mut connection = self.connection.clone();
        Box::pin(async move {
            connection
                .get::<_, Option<String>>(key)
                .await
                .map_err(|err| KvError::Backend(err.to_string()))
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl_seconds: Option<u64>,
    ) -> KvFuture<'a, ()> {
        let mut connection = self.connection.clone();
        Box::pin(async move {
            match ttl_seconds {
                Some(ttl) => connection
                    .set_ex::<_, _, ()>(key, value, ttl)
                    .await
                    .map_err(|err| KvError::Backend(err.to_string())),
                None => connection
                    .set::<_, _, ()>(key, value)
                    .await
                    .map_err(|err| KvError::Backend(err.to_string())),
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> KvFuture<'a, ()> {
        let mut connection = self.connection.clone();
        Box::pin(async move {
            connection
                .del::<_, ()>(key)
                .await
                .map_err(|err| KvError::Backend(err.to_string()))
        })
    }

    fn set_add<'a>(&'a self, key: &'a str, member: &'a str) -> KvFuture<'a, ()> {
        let mut connection = self.connection.clone();
        Box::pin(async move {
            connection
                .sadd::<_, _, ()>(key, member)
                .await
                .map_err(|err| KvError::Backend(err.to_string()))
        })
    }

    fn set_remove<'a>(&'a self, key: &'a str, member: &'a str) -> KvFuture<'a, ()> {
        let mut connection = self.connection.clone();
        Box::pin(async move {
            connection
                .srem::<_, _, ()>(key, member)
                .await
                .map_err(|err| KvError::Backend(err.to_string()))
        })
    }

    fn set_members<'a>(&'a self, key: &'a str) -> KvFuture<'a, Vec<String>> {
        let mut connection = self.connection.clone();
        Box::pin(async move {
            connection
                .smembers::<_, Vec<String>>(key)
                .await
                .map_err(|err| KvError::Backend(err.to_string()))
        })
    }
}

/// In-process store for tests and local development without Redis.
///
/// Expiry honors a simulated clock offset so TTL behavior can be tested
/// without sleeping.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    values: HashMap<String, MemoryEntry>,
    sets: HashMap<String, HashSet<String>>,
    clock_offset: Duration,
    epoch: Option<Instant>,
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryInner {
    fn now(&mut self) -> Instant {
        let epoch = *self.epoch.get_or_insert_with(Instant::now);
        epoch + self.clock_offset
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the simulated clock forward, expiring any keys whose TTL has
    /// elapsed.
    pub fn advance_secs(&self, seconds: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clock_offset += Duration::from_secs(seconds);
    }
}

impl SessionStore for MemorySessionStore {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let now = inner.now();
            let expired = inner
                .values
                .get(key)
                .is_some_and(|entry| entry.expires_at.is_some_and(|deadline| deadline <= now));
            if expired {
                inner.values.remove(key);
                return Ok(None);
            }
            Ok(inner.values.get(key).map(|entry| entry.value.clone()))
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl_seconds: Option<u64>,
    ) -> KvFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let now = inner.now();
            let expires_at = ttl_seconds.map(|ttl| now + Duration::from_secs(ttl));
            inner.values.insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    expires_at,
                },
            );
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> KvFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.values.remove(key);
            Ok(())
        })
    }

    fn set_add<'a>(&'a self, key: &'a str, member: &'a str) -> KvFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .sets
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string());
            Ok(())
        })
    }

    fn set_remove<'a>(&'a self, key: &'a str, member: &'a str) -> KvFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(members) = inner.sets.get_mut(key) {
                members.remove(member);
            }
            Ok(())
        })
    }

    fn set_members<'a>(&'a self, key: &'a str) -> KvFuture<'a, Vec<String>> {
        Box::pin(async move {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut members: Vec<String> = inner
                .sets
                .get(key)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            members.sort();
            Ok(members)
        })
    }
}
