//! # Mnemo - Session Memory Engine
//!
//! **Mnemo** is a tiered session memory engine for conversational agents:
//!
//! - **In-memory store**: bounded LRU hot tier for in-flight sessions
//! - **Cache tier**: write-through Redis-compatible cache with TTL expiry
//! - **Persistence tier**: write-back durable snapshots, the source of truth
//!   across restarts
//! - **Auto-summarization**: older turns are compacted into a summary once a
//!   session crosses its token threshold, keeping prompt growth bounded
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mnemo::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env();
//!
//!     let manager = Arc::new(
//!         SessionManager::new(config.clone())
//!             .with_cache(Arc::new(
//!                 RedisCache::connect(
//!                     &config.cache_url,
//!                     &config.cache_prefix,
//!                     config.cache_pool_size,
//!                     config.cache_acquire_timeout,
//!                 )
//!                 .await?,
//!             ))
//!             .with_persistence(Arc::new(FileStore::new("/var/lib/mnemo", "threads"))),
//!     );
//!
//!     // Write-back sweep for dirty sessions.
//!     let _sync = manager.spawn_sync_task();
//!
//!     let session = manager.get_or_create(None).await?;
//!     let report = manager
//!         .append_turn(&session.chat_id, Message::user("What is Rust?"))
//!         .await?;
//!
//!     // summary + kept messages, ready for the next prompt
//!     let context = manager.context(&session.chat_id).await?;
//!     println!("{} tokens, {} messages", report.token_count, context.len());
//!
//!     manager.close(&session.chat_id).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Tiering
//!
//! ```text
//! request ──► SessionManager
//!               │  resolve: memory → cache → persistence → fresh
//!               │  append + compact (synchronous, bounded timeout)
//!               ├──► cache      (write-through, every mutation, TTL)
//!               └──► persistence (write-back, sync interval / close)
//! ```
//!
//! The cache absorbs per-turn latency; the durable store absorbs the
//! durability cost at lower frequency. Backend failures degrade tier by
//! tier: the caller always gets a response, with degradation reported as
//! [`TurnWarning`]s rather than errors.
//!
//! [`TurnWarning`]: manager::TurnWarning

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod persistence;
pub mod session;
pub mod store;
pub mod summarizer;

pub use error::{MnemoError, MnemoResult};

/// Commonly used types and traits
pub mod prelude {
    pub use crate::cache::{CacheBackend, InMemoryCache, RedisCache};
    pub use crate::config::{EngineConfig, RetryPolicy, SyncSchedule};
    pub use crate::error::{MnemoError, MnemoResult};
    pub use crate::manager::{SessionManager, TurnReport, TurnWarning};
    pub use crate::persistence::{FileStore, PersistedRecord, PersistenceBackend};
    pub use crate::session::{Message, MessageRole, Session, SessionState};
    pub use crate::store::InMemoryStore;
    pub use crate::summarizer::{ExtractiveSummarizer, Summarizer};
}
