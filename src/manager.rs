//! Session manager - orchestrates the memory tiers
//!
//! Resolution order is memory → cache → persistence, first hit wins; absence
//! at every tier means a fresh session, never an error. Mutations are
//! write-through to the cache and write-back to persistence: the cache
//! absorbs per-turn latency while the durable store is written on a schedule
//! or on close.
//!
//! Mutation for one chat id is serialized behind a per-id mutex; requests
//! for different chat ids share nothing and proceed fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::CacheBackend;
use crate::config::EngineConfig;
use crate::error::MnemoResult;
use crate::persistence::{
    save_with_retry, validate_chat_id, PersistedMeta, PersistedRecord, PersistenceBackend,
};
use crate::session::{generate_chat_id, Message, Session, SessionState};
use crate::store::InMemoryStore;
use crate::summarizer::{Compactor, ExtractiveSummarizer, Summarizer};

/// Degraded-mode condition observed while processing a turn.
///
/// Warnings never abort a turn; they tell the caller which tier misbehaved
/// so sustained failures can be surfaced operationally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnWarning {
    /// Cache read/write failed; the turn proceeded without that tier
    CacheDegraded(String),

    /// Persistence failed beyond its retry budget; the in-memory/cache copy
    /// remains authoritative until a later sync succeeds
    PersistenceDegraded(String),

    /// Summarization failed or timed out; skipped this turn, retried next
    SummarizationSkipped(String),
}

impl std::fmt::Display for TurnWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnWarning::CacheDegraded(reason) => write!(f, "cache degraded: {}", reason),
            TurnWarning::PersistenceDegraded(reason) => {
                write!(f, "persistence degraded: {}", reason)
            }
            TurnWarning::SummarizationSkipped(reason) => {
                write!(f, "summarization skipped: {}", reason)
            }
        }
    }
}

/// Result of appending one turn
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Updated session snapshot after append and any compaction
    pub session: Session,

    /// Cumulative token count after the turn
    pub token_count: usize,

    /// Whether this turn triggered a compaction
    pub summarized: bool,

    /// Degraded-mode conditions hit while processing the turn
    pub warnings: Vec<TurnWarning>,
}

/// Orchestrates the in-memory store, cache, persistence, and summarizer
pub struct SessionManager {
    config: EngineConfig,
    store: Arc<InMemoryStore>,
    cache: Option<Arc<dyn CacheBackend>>,
    persistence: Option<Arc<dyn PersistenceBackend>>,
    compactor: Compactor,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    /// Create a manager with no external backends: in-memory only, with the
    /// default extractive summarizer
    pub fn new(config: EngineConfig) -> Self {
        let compactor = Compactor::new(
            Arc::new(ExtractiveSummarizer::default()),
            config.max_tokens,
            config.preserve_recent,
            config.summarize_timeout,
        );
        Self {
            store: Arc::new(InMemoryStore::new(config.max_sessions)),
            cache: None,
            persistence: None,
            compactor,
            locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Attach a cache tier
    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach a persistence tier
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceBackend>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Replace the summarizer (e.g. with an LLM-backed one)
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.compactor = Compactor::new(
            summarizer,
            self.config.max_tokens,
            self.config.preserve_recent,
            self.config.summarize_timeout,
        );
        self
    }

    /// The effective configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fetch or create a session.
    ///
    /// With `None`, a new unique chat id is generated. With a chat id, the
    /// tiers are consulted in order (memory, cache, persistence); a miss
    /// everywhere yields a fresh empty session. Unreachable backends degrade
    /// to the next tier with a warning log rather than failing.
    pub async fn get_or_create(&self, chat_id: Option<&str>) -> MnemoResult<Session> {
        let chat_id = match chat_id {
            Some(id) => {
                validate_chat_id(id)?;
                id.to_string()
            }
            None => generate_chat_id(),
        };

        let lock = self.lock_for(&chat_id).await;
        let _guard = lock.lock().await;

        let session = self.resolve(&chat_id).await;
        self.admit(session.clone()).await;
        Ok(session)
    }

    /// Append one turn to a session, compacting and write-through caching.
    ///
    /// Summarization runs synchronously before this returns so context
    /// growth is bounded deterministically; its failures (and cache trouble)
    /// are reported as warnings, never as errors.
    pub async fn append_turn(&self, chat_id: &str, message: Message) -> MnemoResult<TurnReport> {
        validate_chat_id(chat_id)?;

        let lock = self.lock_for(chat_id).await;
        let _guard = lock.lock().await;

        let mut warnings = Vec::new();
        let mut session = self.resolve(chat_id).await;
        session.append(message);

        let summarized = match self.compactor.maybe_compact(&mut session).await {
            Ok(compacted) => compacted,
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "Summarization skipped this turn");
                warnings.push(TurnWarning::SummarizationSkipped(e.to_string()));
                false
            }
        };

        // Write-through: the cache sees every mutation.
        if let Some(cache) = self.cache_tier() {
            if let Err(e) = cache.set(chat_id, &session, self.config.cache_ttl).await {
                warn!(chat_id = %chat_id, error = %e, "Cache write failed, continuing without cache");
                warnings.push(TurnWarning::CacheDegraded(e.to_string()));
            }
        }

        self.admit(session.clone()).await;

        Ok(TurnReport {
            token_count: session.token_count(),
            summarized,
            session,
            warnings,
        })
    }

    /// Effective message list (summary + kept messages) for the next prompt
    pub async fn context(&self, chat_id: &str) -> MnemoResult<Vec<Message>> {
        let session = self.get_or_create(Some(chat_id)).await?;
        Ok(session.effective_messages())
    }

    /// Persist a session's current state if it has unpersisted mutations.
    ///
    /// Idempotent: clean sessions (and sessions absent from the hot tier)
    /// are skipped with `Ok(false)`. The write retries with bounded backoff;
    /// on budget exhaustion the error surfaces and the in-memory copy stays
    /// authoritative and dirty.
    pub async fn sync(&self, chat_id: &str) -> MnemoResult<bool> {
        validate_chat_id(chat_id)?;

        let lock = self.lock_for(chat_id).await;
        let _guard = lock.lock().await;
        self.sync_locked(chat_id).await
    }

    async fn sync_locked(&self, chat_id: &str) -> MnemoResult<bool> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        let Some(mut session) = self.store.get(chat_id).await else {
            return Ok(false);
        };
        if !session.dirty {
            debug!(chat_id = %chat_id, "Sync skipped, session clean");
            return Ok(false);
        }

        let record = PersistedRecord::snapshot(&session);
        save_with_retry(
            persistence.as_ref(),
            chat_id,
            &record,
            &self.config.persist_retry,
        )
        .await?;

        session.dirty = false;
        self.store.insert(session).await;
        Ok(true)
    }

    /// Close a session: sync if configured, then evict from the hot tiers.
    ///
    /// Returns the final snapshot, marked [`SessionState::Closed`], when the
    /// session was resident. Closing is terminal for this handle only; the
    /// chat id can later be reconstituted from persistence by a new
    /// `get_or_create` call.
    pub async fn close(&self, chat_id: &str) -> MnemoResult<Option<Session>> {
        validate_chat_id(chat_id)?;

        let lock = self.lock_for(chat_id).await;
        let closed = {
            let _guard = lock.lock().await;

            if self.config.sync_on_close {
                if let Err(e) = self.sync_locked(chat_id).await {
                    warn!(chat_id = %chat_id, error = %e, "Sync on close failed; durable copy may be stale");
                }
            }

            let mut closed = self.store.remove(chat_id).await;
            if let Some(session) = closed.as_mut() {
                session.state = SessionState::Closed;
            }
            if let Some(cache) = self.cache_tier() {
                if let Err(e) = cache.delete(chat_id).await {
                    warn!(chat_id = %chat_id, error = %e, "Cache eviction on close failed");
                }
            }
            closed
        };
        self.release_lock(chat_id, &lock).await;

        info!(chat_id = %chat_id, "Session closed");
        Ok(closed)
    }

    /// Remove a session from every tier, including durable storage
    pub async fn delete(&self, chat_id: &str) -> MnemoResult<()> {
        validate_chat_id(chat_id)?;

        let lock = self.lock_for(chat_id).await;
        let result = {
            let _guard = lock.lock().await;

            self.store.remove(chat_id).await;
            if let Some(cache) = self.cache_tier() {
                if let Err(e) = cache.delete(chat_id).await {
                    warn!(chat_id = %chat_id, error = %e, "Cache delete failed");
                }
            }
            match &self.persistence {
                Some(persistence) => persistence.delete(chat_id).await.map(|_| ()),
                None => Ok(()),
            }
        };
        self.release_lock(chat_id, &lock).await;
        result?;

        info!(chat_id = %chat_id, "Session deleted");
        Ok(())
    }

    /// List durable session records, up to `limit`
    pub async fn list_persisted(&self, limit: usize) -> MnemoResult<Vec<PersistedMeta>> {
        match &self.persistence {
            Some(persistence) => persistence.list(limit).await,
            None => Ok(Vec::new()),
        }
    }

    /// Spawn the background write-back task: every sync interval, persist
    /// all dirty sessions. Failures are logged and retried on the next tick.
    /// Abort the returned handle to stop the task.
    pub fn spawn_sync_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = self.config.sync_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sync_all_dirty().await;
            }
        })
    }

    /// Persist every dirty session currently resident in the hot tier
    pub async fn sync_all_dirty(&self) {
        let dirty = self.store.dirty_ids().await;
        if dirty.is_empty() {
            return;
        }
        debug!(count = dirty.len(), "Write-back sweep started");
        for chat_id in dirty {
            if let Err(e) = self.sync(&chat_id).await {
                warn!(chat_id = %chat_id, error = %e, "Write-back sweep failed for session");
            }
        }
    }

    /// The cache backend, when one is attached and the tier is enabled
    fn cache_tier(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.cache.as_ref().filter(|_| self.config.cache_enabled)
    }

    /// Resolve a session through the tiers; a total miss is a fresh session
    async fn resolve(&self, chat_id: &str) -> Session {
        if let Some(session) = self.store.get(chat_id).await {
            return session;
        }

        if let Some(cache) = self.cache_tier() {
            match cache.get(chat_id).await {
                Ok(Some(mut session)) => {
                    debug!(chat_id = %chat_id, "Session restored from cache");
                    session.touch();
                    return session;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(chat_id = %chat_id, error = %e, "Cache read failed, falling back to persistence");
                }
            }
        }

        if let Some(persistence) = &self.persistence {
            match persistence.load(chat_id).await {
                Ok(Some(record)) => {
                    debug!(chat_id = %chat_id, "Session restored from persistence");
                    let mut session = record.session;
                    session.touch();
                    return session;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(chat_id = %chat_id, error = %e, "Persistence read failed, starting fresh session");
                }
            }
        }

        debug!(chat_id = %chat_id, "Starting fresh session");
        Session::new(chat_id)
    }

    /// Put a session into the hot tier, flushing any dirty LRU evictee
    async fn admit(&self, session: Session) {
        let Some(evicted) = self.store.insert(session).await else {
            return;
        };
        if !evicted.dirty {
            return;
        }

        // Best-effort write-back so LRU pressure does not drop the only
        // durable-bound copy. The cache still holds it until TTL.
        if let Some(persistence) = &self.persistence {
            let record = PersistedRecord::snapshot(&evicted);
            if let Err(e) = save_with_retry(
                persistence.as_ref(),
                &evicted.chat_id,
                &record,
                &self.config.persist_retry,
            )
            .await
            {
                warn!(
                    chat_id = %evicted.chat_id,
                    error = %e,
                    "Failed to persist evicted dirty session"
                );
            }
        } else {
            warn!(
                chat_id = %evicted.chat_id,
                "Dirty session evicted with no persistence configured"
            );
        }
    }

    /// Per-chat-id mutation lock, created on demand. `close` and `delete`
    /// reclaim entries through [`Self::release_lock`] so the map does not
    /// grow with every chat id ever touched.
    async fn lock_for(&self, chat_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(chat_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Reclaim a chat id's lock entry once no other task holds it.
    ///
    /// Two strong references mean exactly the map entry plus `lock`; any
    /// waiter would hold a third. A newcomer must take the map mutex to
    /// mint a lock, so the count cannot change under us here.
    async fn release_lock(&self, chat_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(lock) == 2 {
            locks.remove(chat_id);
        }
    }
}
