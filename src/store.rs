//! In-memory session store
//!
//! Process-local hot tier: a bounded map from chat id to [`Session`], evicting
//! the least-recently-accessed session under capacity pressure. Purely a
//! performance layer; it is never the only copy of data that must survive a
//! restart.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::session::Session;

/// Bounded LRU-ish map of hot sessions
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    max_sessions: usize,
}

impl InMemoryStore {
    /// Create a store holding at most `max_sessions` sessions.
    /// A capacity of zero is treated as one.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Fetch a copy of a session, refreshing its last-accessed time
    pub async fn get(&self, chat_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(chat_id)?;
        session.touch();
        Some(session.clone())
    }

    /// Insert or replace a session. When the store is over capacity the
    /// least-recently-accessed *other* session is evicted and returned so the
    /// caller can flush it if dirty.
    pub async fn insert(&self, session: Session) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let chat_id = session.chat_id.clone();
        sessions.insert(chat_id.clone(), session);

        if sessions.len() <= self.max_sessions {
            return None;
        }

        let evict_id = sessions
            .values()
            .filter(|s| s.chat_id != chat_id)
            .min_by_key(|s| s.last_accessed_at)
            .map(|s| s.chat_id.clone())?;

        let evicted = sessions.remove(&evict_id);
        if let Some(evicted) = &evicted {
            debug!(chat_id = %evicted.chat_id, dirty = evicted.dirty, "Evicted session from in-memory store");
        }
        evicted
    }

    /// Remove a session, returning it if present
    pub async fn remove(&self, chat_id: &str) -> Option<Session> {
        self.sessions.write().await.remove(chat_id)
    }

    /// Whether a session is currently resident
    pub async fn contains(&self, chat_id: &str) -> bool {
        self.sessions.read().await.contains_key(chat_id)
    }

    /// Chat ids of all resident sessions with unpersisted mutations
    pub async fn dirty_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.dirty)
            .map(|s| s.chat_id.clone())
            .collect()
    }

    /// Number of resident sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop all resident sessions
    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Message;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryStore::new(10);
        store.insert(Session::new("a")).await;

        assert!(store.get("a").await.is_some());
        assert!(store.get("b").await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_prefers_least_recent() {
        let store = InMemoryStore::new(2);

        let mut a = Session::new("a");
        a.last_accessed_at = chrono::Utc::now() - chrono::Duration::seconds(30);
        let mut b = Session::new("b");
        b.last_accessed_at = chrono::Utc::now() - chrono::Duration::seconds(10);

        assert!(store.insert(a).await.is_none());
        assert!(store.insert(b).await.is_none());

        // Third insert pushes out "a", the coldest entry.
        let evicted = store.insert(Session::new("c")).await.unwrap();
        assert_eq!(evicted.chat_id, "a");
        assert!(store.contains("b").await);
        assert!(store.contains("c").await);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_refreshes_recency() {
        let store = InMemoryStore::new(2);

        let mut a = Session::new("a");
        a.last_accessed_at = chrono::Utc::now() - chrono::Duration::seconds(30);
        let mut b = Session::new("b");
        b.last_accessed_at = chrono::Utc::now() - chrono::Duration::seconds(10);

        store.insert(a).await;
        store.insert(b).await;

        // Touch "a" so "b" becomes the eviction candidate.
        store.get("a").await.unwrap();

        let evicted = store.insert(Session::new("c")).await.unwrap();
        assert_eq!(evicted.chat_id, "b");
    }

    #[tokio::test]
    async fn test_never_evicts_the_session_just_inserted() {
        let store = InMemoryStore::new(1);
        store.insert(Session::new("a")).await;

        let mut fresh = Session::new("b");
        // Even with an ancient timestamp, the incoming session survives.
        fresh.last_accessed_at = chrono::Utc::now() - chrono::Duration::days(1);
        let evicted = store.insert(fresh).await.unwrap();

        assert_eq!(evicted.chat_id, "a");
        assert!(store.contains("b").await);
    }

    #[tokio::test]
    async fn test_dirty_ids() {
        let store = InMemoryStore::new(10);

        let mut dirty = Session::new("dirty");
        dirty.append(Message::user("hello"));
        store.insert(dirty).await;
        store.insert(Session::new("clean")).await;

        assert_eq!(store.dirty_ids().await, vec!["dirty".to_string()]);
    }
}
