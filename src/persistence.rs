//! Durable persistence backends
//!
//! The persistence tier is the source of truth across process restarts.
//! Writes are full-snapshot overwrites keyed by chat id under a folder
//! prefix; there is no append log. Loads of unknown keys return `Ok(None)`.
//!
//! Sync failures are retried with bounded exponential backoff
//! ([`save_with_retry`]); until a save succeeds the in-memory/cache copy
//! remains authoritative.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{MnemoError, MnemoResult};
use crate::session::Session;

/// Durable snapshot of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Chat id this record belongs to
    pub chat_id: String,

    /// Full session snapshot (summary + kept messages), stored clean
    pub session: Session,

    /// When the snapshot was taken
    pub persisted_at: chrono::DateTime<chrono::Utc>,
}

impl PersistedRecord {
    /// Snapshot a session for persistence. The stored copy is marked clean:
    /// a record only exists once the write it describes has succeeded.
    pub fn snapshot(session: &Session) -> Self {
        let mut session = session.clone();
        session.dirty = false;
        Self {
            chat_id: session.chat_id.clone(),
            session,
            persisted_at: chrono::Utc::now(),
        }
    }
}

/// Metadata about a persisted session, without loading the full record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMeta {
    /// Chat id of the record
    pub chat_id: String,

    /// Record size in bytes
    pub size: u64,

    /// Last modification time, if the backend exposes one
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// Durable blob storage for session snapshots
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Write a full snapshot, overwriting any previous record
    async fn save(&self, chat_id: &str, record: &PersistedRecord) -> MnemoResult<()>;

    /// Load the latest snapshot. `Ok(None)` for unknown keys.
    async fn load(&self, chat_id: &str) -> MnemoResult<Option<PersistedRecord>>;

    /// Remove a record, returning whether one existed
    async fn delete(&self, chat_id: &str) -> MnemoResult<bool>;

    /// Whether a record exists without loading it
    async fn exists(&self, chat_id: &str) -> MnemoResult<bool>;

    /// List persisted records, up to `limit`
    async fn list(&self, limit: usize) -> MnemoResult<Vec<PersistedMeta>>;
}

/// Filesystem-backed blob store.
///
/// Records live at `{root}/{folder}/{chat_id}.json`. Writes go to a
/// temporary file first and are renamed into place, so readers never observe
/// a partial snapshot.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a file store rooted at `root` with records under `folder`
    pub fn new(root: impl Into<PathBuf>, folder: impl AsRef<Path>) -> Self {
        Self {
            dir: root.into().join(folder.as_ref()),
        }
    }

    fn blob_path(&self, chat_id: &str) -> MnemoResult<PathBuf> {
        validate_chat_id(chat_id)?;
        Ok(self.dir.join(format!("{}.json", chat_id)))
    }
}

/// Reject chat ids that cannot double as storage keys.
///
/// Generated ids are UUIDs; caller-supplied ids must stick to the same safe
/// alphabet so no backend has to worry about traversal or separators.
pub fn validate_chat_id(chat_id: &str) -> MnemoResult<()> {
    if chat_id.is_empty() {
        return Err(MnemoError::invalid_chat_id(chat_id, "empty"));
    }
    if chat_id == "." || chat_id == ".." {
        return Err(MnemoError::invalid_chat_id(chat_id, "reserved path name"));
    }
    if !chat_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(MnemoError::invalid_chat_id(
            chat_id,
            "allowed characters are [A-Za-z0-9._-]",
        ));
    }
    Ok(())
}

#[async_trait]
impl PersistenceBackend for FileStore {
    async fn save(&self, chat_id: &str, record: &PersistedRecord) -> MnemoResult<()> {
        let path = self.blob_path(chat_id)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MnemoError::io("create_dir", e))?;

        let payload = serde_json::to_vec_pretty(record)
            .map_err(|e| MnemoError::serialization("encode_record", e))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &payload)
            .await
            .map_err(|e| MnemoError::persistence("save", 1, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| MnemoError::persistence("save", 1, e))?;

        debug!(chat_id = %chat_id, bytes = payload.len(), "Session snapshot persisted");
        Ok(())
    }

    async fn load(&self, chat_id: &str) -> MnemoResult<Option<PersistedRecord>> {
        let path = self.blob_path(chat_id)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(chat_id = %chat_id, "No persisted record");
                return Ok(None);
            }
            Err(e) => return Err(MnemoError::persistence("load", 1, e)),
        };

        let record = serde_json::from_slice(&raw)
            .map_err(|e| MnemoError::serialization("decode_record", e))?;
        debug!(chat_id = %chat_id, "Persisted record loaded");
        Ok(Some(record))
    }

    async fn delete(&self, chat_id: &str) -> MnemoResult<bool> {
        let path = self.blob_path(chat_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MnemoError::persistence("delete", 1, e)),
        }
    }

    async fn exists(&self, chat_id: &str) -> MnemoResult<bool> {
        let path = self.blob_path(chat_id)?;
        Ok(fs::try_exists(&path)
            .await
            .map_err(|e| MnemoError::persistence("exists", 1, e))?)
    }

    async fn list(&self, limit: usize) -> MnemoResult<Vec<PersistedMeta>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MnemoError::persistence("list", 1, e)),
        };

        let mut results = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MnemoError::persistence("list", 1, e))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(chat_id) = name.strip_suffix(".json") else {
                continue;
            };

            let meta = entry
                .metadata()
                .await
                .map_err(|e| MnemoError::persistence("list", 1, e))?;
            let last_modified = meta
                .modified()
                .ok()
                .map(chrono::DateTime::<chrono::Utc>::from);

            results.push(PersistedMeta {
                chat_id: chat_id.to_string(),
                size: meta.len(),
                last_modified,
            });

            if results.len() >= limit {
                break;
            }
        }

        Ok(results)
    }
}

/// Save with bounded exponential backoff.
///
/// Retries transient failures up to the policy's attempt budget; on
/// exhaustion the last error is surfaced with the attempt count so callers
/// can report a durability warning without failing the in-flight turn.
pub async fn save_with_retry(
    backend: &dyn PersistenceBackend,
    chat_id: &str,
    record: &PersistedRecord,
    policy: &RetryPolicy,
) -> MnemoResult<()> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_reason = String::new();

    for attempt in 1..=max_attempts {
        match backend.save(chat_id, record).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(
                    chat_id = %chat_id,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Persistence save failed"
                );
                last_reason = e.to_string();
                if attempt < max_attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }

    Err(MnemoError::persistence("save", max_attempts, last_reason))
}
