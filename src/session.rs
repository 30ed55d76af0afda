//! Session and message data model
//!
//! A [`Session`] is the durable conversational state for one `chat_id`: an
//! append-only sequence of [`Message`]s plus an optional summary standing in
//! for messages that have been compacted away. The [`SessionManager`] is the
//! single logical owner of a session while it is in flight; cache and
//! persistence tiers only ever hold copies.
//!
//! [`SessionManager`]: crate::manager::SessionManager

use serde::{Deserialize, Serialize};

/// Role of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End-user input
    User,
    /// Model output
    Assistant,
    /// Tool invocation result
    Tool,
    /// System instruction (also used for injected summaries)
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// A single conversation turn, immutable once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message
    pub role: MessageRole,

    /// Message text
    pub content: String,

    /// Token cost, computed at construction time
    pub token_count: usize,

    /// When the message was created
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Message {
    /// Create a message; the token count is computed from the content
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        let content = content.into();
        let token_count = estimate_tokens(&content);
        Self {
            role,
            content,
            token_count,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create a tool message
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// Estimate the token cost of a piece of text.
///
/// Heuristic: roughly four characters per token, rounded up. Chosen over a
/// model-specific tokenizer so the engine stays provider-agnostic; callers
/// that need exact accounting can pre-tokenize and size messages themselves.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    (chars + 3) / 4
}

/// Lifecycle state of a session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, no turns appended yet
    New,
    /// At least one turn appended
    Active,
    /// Closed in this process; a new handle may reconstitute the chat id
    Closed,
}

/// Conversational state for one chat id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque, caller-assigned or engine-generated identifier
    pub chat_id: String,

    /// Messages kept verbatim, in append order
    pub messages: Vec<Message>,

    /// Compressed stand-in for messages elided by summarization
    pub summary: Option<String>,

    /// When the session was first created
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Last read or mutation, drives LRU eviction
    pub last_accessed_at: chrono::DateTime<chrono::Utc>,

    /// Lifecycle state
    pub state: SessionState,

    /// Mutated since the last successful persistence write.
    /// Serialized so a cache-recovered session still gets synced.
    #[serde(default)]
    pub dirty: bool,
}

impl Session {
    /// Create an empty session for a chat id
    pub fn new(chat_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            chat_id: chat_id.into(),
            messages: Vec::new(),
            summary: None,
            created_at: now,
            last_accessed_at: now,
            state: SessionState::New,
            dirty: false,
        }
    }

    /// Append a message, marking the session active and dirty
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.state = SessionState::Active;
        self.dirty = true;
        self.touch();
    }

    /// Cumulative token count: summary tokens plus all kept messages.
    ///
    /// Monotone non-decreasing between compactions; a compaction resets it
    /// to `tokens(summary) + sum(kept message tokens)`.
    pub fn token_count(&self) -> usize {
        let summary_tokens = self.summary.as_deref().map(estimate_tokens).unwrap_or(0);
        summary_tokens + self.messages.iter().map(|m| m.token_count).sum::<usize>()
    }

    /// Effective message list for prompt construction: the summary (as a
    /// system message) followed by the verbatim kept messages
    pub fn effective_messages(&self) -> Vec<Message> {
        let mut effective = Vec::with_capacity(self.messages.len() + 1);
        if let Some(summary) = &self.summary {
            effective.push(Message::system(format!(
                "Summary of earlier conversation: {}",
                summary
            )));
        }
        effective.extend(self.messages.iter().cloned());
        effective
    }

    /// Update the last-accessed timestamp
    pub fn touch(&mut self) {
        self.last_accessed_at = chrono::Utc::now();
    }

    /// Whether the session has no content at all
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.summary.is_none()
    }
}

/// Generate a unique chat id
pub fn generate_chat_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(120)), 30);
    }

    #[test]
    fn test_append_marks_dirty_and_active() {
        let mut session = Session::new("abc");
        assert_eq!(session.state, SessionState::New);
        assert!(!session.dirty);

        session.append(Message::user("hello"));

        assert_eq!(session.state, SessionState::Active);
        assert!(session.dirty);
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_token_count_is_monotone_across_appends() {
        let mut session = Session::new("abc");
        let mut last = 0;
        for i in 0..5 {
            session.append(Message::user(format!("message number {}", i)));
            let count = session.token_count();
            assert!(count >= last);
            last = count;
        }
    }

    #[test]
    fn test_effective_messages_includes_summary_first() {
        let mut session = Session::new("abc");
        session.summary = Some("talked about rust".to_string());
        session.append(Message::user("next question"));

        let effective = session.effective_messages();
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[0].role, MessageRole::System);
        assert!(effective[0].content.contains("talked about rust"));
        assert_eq!(effective[1].content, "next question");
    }

    #[test]
    fn test_serde_round_trip_preserves_dirty() {
        let mut session = Session::new("abc");
        session.append(Message::user("hello"));

        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();

        assert!(restored.dirty);
        assert_eq!(restored.messages, session.messages);

        // Older payloads without the field default to clean.
        let legacy = json.replace("\"dirty\":true,", "").replace(",\"dirty\":true", "");
        let restored: Session = serde_json::from_str(&legacy).unwrap();
        assert!(!restored.dirty);
    }

    #[test]
    fn test_generated_chat_ids_are_unique() {
        assert_ne!(generate_chat_id(), generate_chat_id());
    }
}
