//! Cache backends
//!
//! The cache is a write-through performance tier keyed by chat id with TTL
//! expiry. It is never the source of truth: every operation may fail, and the
//! [`SessionManager`] treats any failure as a cache miss and degrades to the
//! next tier.
//!
//! [`SessionManager`]: crate::manager::SessionManager

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info};

use crate::error::{MnemoError, MnemoResult};
use crate::session::Session;

/// Remote key/value store with TTL semantics
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a cached session. `Ok(None)` means miss or expired.
    async fn get(&self, chat_id: &str) -> MnemoResult<Option<Session>>;

    /// Store a session copy under the given TTL
    async fn set(&self, chat_id: &str, session: &Session, ttl: Duration) -> MnemoResult<()>;

    /// Drop a cached session. Deleting an absent key is not an error.
    async fn delete(&self, chat_id: &str) -> MnemoResult<()>;
}

/// Redis-backed cache using a multiplexed connection manager.
///
/// Outstanding operations are bounded by a semaphore sized to the connection
/// pool; under exhaustion callers block up to the acquire timeout rather than
/// failing fast, so load spikes shed gradually instead of stampeding.
pub struct RedisCache {
    conn: ConnectionManager,
    prefix: String,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl RedisCache {
    /// Connect to a Redis-compatible server
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        pool_size: usize,
        acquire_timeout: Duration,
    ) -> MnemoResult<Self> {
        let client = redis::Client::open(url).map_err(|e| MnemoError::cache("connect", e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| MnemoError::cache("connect", e))?;

        info!(url = %url, pool_size, "Cache backend connected");

        Ok(Self {
            conn,
            prefix: prefix.into(),
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            acquire_timeout,
        })
    }

    fn key(&self, chat_id: &str) -> String {
        format!("{}{}", self.prefix, chat_id)
    }

    async fn permit(&self) -> MnemoResult<tokio::sync::SemaphorePermit<'_>> {
        tokio::time::timeout(self.acquire_timeout, self.permits.acquire())
            .await
            .map_err(|_| MnemoError::cache("acquire", "connection pool exhausted"))?
            .map_err(|e| MnemoError::cache("acquire", e))
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, chat_id: &str) -> MnemoResult<Option<Session>> {
        let _permit = self.permit().await?;
        let mut conn = self.conn.clone();

        let raw: Option<String> = conn
            .get(self.key(chat_id))
            .await
            .map_err(|e| MnemoError::cache("get", e))?;

        match raw {
            Some(payload) => {
                let session = serde_json::from_str(&payload)
                    .map_err(|e| MnemoError::serialization("decode_cached_session", e))?;
                debug!(chat_id = %chat_id, "Cache hit");
                Ok(Some(session))
            }
            None => {
                debug!(chat_id = %chat_id, "Cache miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, chat_id: &str, session: &Session, ttl: Duration) -> MnemoResult<()> {
        let _permit = self.permit().await?;
        let mut conn = self.conn.clone();

        let payload = serde_json::to_string(session)
            .map_err(|e| MnemoError::serialization("encode_session", e))?;

        let _: () = conn
            .set_ex(self.key(chat_id), payload, ttl.as_secs())
            .await
            .map_err(|e| MnemoError::cache("set", e))?;

        Ok(())
    }

    async fn delete(&self, chat_id: &str) -> MnemoResult<()> {
        let _permit = self.permit().await?;
        let mut conn = self.conn.clone();

        let _: () = conn
            .del(self.key(chat_id))
            .await
            .map_err(|e| MnemoError::cache("delete", e))?;

        Ok(())
    }
}

/// Process-local cache with TTL expiry.
///
/// Useful for tests and single-process deployments where a remote cache
/// would be overkill but the manager's tiering should still be exercised.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CachedEntry>>,
}

struct CachedEntry {
    session: Session,
    expires_at: tokio::time::Instant,
}

impl InMemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live (possibly expired but not yet reaped) entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop all entries
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, chat_id: &str) -> MnemoResult<Option<Session>> {
        let now = tokio::time::Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get(chat_id) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.session.clone())),
            Some(_) => {
                // Expired; reap lazily on read.
                entries.remove(chat_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, chat_id: &str, session: &Session, ttl: Duration) -> MnemoResult<()> {
        let entry = CachedEntry {
            session: session.clone(),
            expires_at: tokio::time::Instant::now() + ttl,
        };
        self.entries
            .write()
            .await
            .insert(chat_id.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, chat_id: &str) -> MnemoResult<()> {
        self.entries.write().await.remove(chat_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Message;

    #[tokio::test]
    async fn test_in_memory_cache_set_get_delete() {
        let cache = InMemoryCache::new();
        let mut session = Session::new("abc");
        session.append(Message::user("hello"));

        cache
            .set("abc", &session, Duration::from_secs(60))
            .await
            .unwrap();

        let cached = cache.get("abc").await.unwrap().unwrap();
        assert_eq!(cached.messages.len(), 1);
        assert!(cached.dirty);

        cache.delete("abc").await.unwrap();
        assert!(cache.get("abc").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_cache_ttl_expiry() {
        let cache = InMemoryCache::new();
        let session = Session::new("abc");

        cache
            .set("abc", &session, Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get("abc").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("abc").await.unwrap().is_none());
        // Expired entry was reaped.
        assert!(cache.is_empty().await);
    }
}
