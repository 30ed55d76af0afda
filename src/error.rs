//! Error types for the session memory engine
//!
//! The taxonomy separates recoverable backend trouble (cache, persistence,
//! summarization) from caller mistakes (invalid chat ids). There is
//! deliberately no "session not found" variant: an unknown chat id always
//! resolves to a fresh session.

use std::time::Duration;

/// Result alias used throughout the crate
pub type MnemoResult<T> = Result<T, MnemoError>;

/// Errors produced by the session memory engine
#[derive(thiserror::Error, Debug)]
pub enum MnemoError {
    /// Cache backend could not be reached or answered with an error.
    /// The manager treats this as a cache miss and degrades to the next tier.
    #[error("cache unavailable during {operation}: {reason}")]
    CacheUnavailable {
        /// Operation that failed (get, set, delete, connect, acquire)
        operation: String,
        /// Underlying failure description
        reason: String,
    },

    /// Persistence backend failed after exhausting the retry budget
    #[error("persistence unavailable during {operation} after {attempts} attempt(s): {reason}")]
    PersistenceUnavailable {
        /// Operation that failed (save, load, delete, list)
        operation: String,
        /// Attempts made before giving up
        attempts: u32,
        /// Underlying failure description
        reason: String,
    },

    /// The summarization call itself failed; the session is left unmodified
    #[error("summarization failed: {reason}")]
    SummarizationFailed {
        /// Underlying failure description
        reason: String,
    },

    /// Summarization exceeded its dedicated timeout; skipped for this turn
    #[error("summarization timed out after {timeout_ms}ms")]
    SummarizationTimeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Chat id not usable as a storage key (path traversal, control chars)
    #[error("invalid chat id {chat_id:?}: {reason}")]
    InvalidChatId {
        /// The offending id
        chat_id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Session payload could not be encoded/decoded
    #[error("serialization error during {operation}")]
    Serialization {
        /// Operation that failed (encode_session, decode_record, ...)
        operation: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem I/O failure in a persistence backend
    #[error("i/o error during {operation}")]
    Io {
        /// Operation that failed
        operation: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl MnemoError {
    /// Cache failure, degrading to the next tier
    pub fn cache(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::CacheUnavailable {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Persistence failure after `attempts` tries
    pub fn persistence(
        operation: impl Into<String>,
        attempts: u32,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::PersistenceUnavailable {
            operation: operation.into(),
            attempts,
            reason: reason.to_string(),
        }
    }

    /// Summarization call failure
    pub fn summarization(reason: impl std::fmt::Display) -> Self {
        Self::SummarizationFailed {
            reason: reason.to_string(),
        }
    }

    /// Summarization timeout
    pub fn summarization_timeout(timeout: Duration) -> Self {
        Self::SummarizationTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Rejected chat id
    pub fn invalid_chat_id(chat_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidChatId {
            chat_id: chat_id.into(),
            reason: reason.into(),
        }
    }

    /// Serde failure
    pub fn serialization(operation: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            operation: operation.into(),
            source,
        }
    }

    /// I/O failure
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Whether this error is degradable: the turn can proceed and the
    /// condition only needs to be reported, not propagated
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidChatId { .. })
    }
}
