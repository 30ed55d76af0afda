//! Summarization and session compaction
//!
//! When a session's cumulative token count crosses the configured threshold,
//! the [`Compactor`] folds everything except the most recent
//! `preserve_recent` messages (plus any prior summary) into a single new
//! summary. Compaction is best-effort and atomic from the session's
//! perspective: the session is mutated only after the summarization call
//! succeeds within its timeout, otherwise it is left untouched and retried
//! on the next turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{MnemoError, MnemoResult};
use crate::session::{Message, Session};

/// Produces a compressed stand-in for a run of older messages
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `messages` (oldest first), folding in `prior_summary` when
    /// one exists so earlier compactions are not lost
    async fn summarize(
        &self,
        prior_summary: Option<&str>,
        messages: &[Message],
    ) -> MnemoResult<String>;
}

/// Deterministic extractive summarizer.
///
/// Default implementation where no LLM is wired up: keeps a bounded digest of
/// "role: snippet" lines, newest compactions folding onto older ones. An LLM
/// integration implements [`Summarizer`] and is injected through the manager.
pub struct ExtractiveSummarizer {
    /// Per-message snippet length in characters
    snippet_chars: usize,

    /// Hard cap on the produced summary length in characters
    max_chars: usize,
}

impl ExtractiveSummarizer {
    /// Create a summarizer with custom bounds
    pub fn new(snippet_chars: usize, max_chars: usize) -> Self {
        Self {
            snippet_chars: snippet_chars.max(8),
            max_chars: max_chars.max(32),
        }
    }

    fn snippet(&self, text: &str) -> String {
        let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.chars().count() <= self.snippet_chars {
            return cleaned;
        }
        let truncated: String = cleaned.chars().take(self.snippet_chars).collect();
        format!("{}…", truncated.trim_end())
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new(80, 600)
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(
        &self,
        prior_summary: Option<&str>,
        messages: &[Message],
    ) -> MnemoResult<String> {
        let mut lines = Vec::with_capacity(messages.len() + 1);
        if let Some(prior) = prior_summary {
            lines.push(prior.to_string());
        }
        for message in messages {
            lines.push(format!("{}: {}", message.role, self.snippet(&message.content)));
        }

        let mut summary = lines.join(" | ");
        if summary.chars().count() > self.max_chars {
            // Drop the oldest material first; the tail is the freshest.
            let tail: String = summary
                .chars()
                .rev()
                .take(self.max_chars)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            summary = format!("…{}", tail.trim_start());
        }

        Ok(summary)
    }
}

/// Applies the summarization policy to sessions
pub struct Compactor {
    summarizer: Arc<dyn Summarizer>,
    max_tokens: usize,
    preserve_recent: usize,
    timeout: Duration,
}

impl Compactor {
    /// Create a compactor over a summarizer
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        max_tokens: usize,
        preserve_recent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            summarizer,
            max_tokens,
            preserve_recent,
            timeout,
        }
    }

    /// Whether a session currently qualifies for compaction
    pub fn needs_compaction(&self, session: &Session) -> bool {
        session.token_count() > self.max_tokens && session.messages.len() > self.preserve_recent
    }

    /// Compact the session if it crossed the threshold.
    ///
    /// Returns `Ok(true)` when a compaction happened, `Ok(false)` when none
    /// was needed. On failure or timeout the session is unmodified and the
    /// error is returned for the caller to log; the next turn retries.
    pub async fn maybe_compact(&self, session: &mut Session) -> MnemoResult<bool> {
        if !self.needs_compaction(session) {
            return Ok(false);
        }

        let split = session.messages.len() - self.preserve_recent;
        let older = &session.messages[..split];
        let before_tokens = session.token_count();

        let call = self
            .summarizer
            .summarize(session.summary.as_deref(), older);
        let summary = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => return Err(MnemoError::summarization(e)),
            Err(_) => return Err(MnemoError::summarization_timeout(self.timeout)),
        };

        // Replace-on-success: only now does the session change.
        session.messages.drain(..split);
        session.summary = Some(summary);
        session.dirty = true;
        session.touch();

        info!(
            chat_id = %session.chat_id,
            compacted = split,
            kept = session.messages.len(),
            before_tokens,
            after_tokens = session.token_count(),
            "Session compacted"
        );
        Ok(true)
    }
}
