//! Session domain types.
//!
//! A session is the ordered conversation between one sender on one channel
//! and the agent. History is append-only; the only other mutation is the
//! consolidation offset, which advances monotonically as old messages are
//! summarized into durable memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Tool execution output
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// A single message in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The persistent state of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Stable identifier (typically `<channel>:<sender>`)
    pub session_id: String,

    /// Which channel this session belongs to
    pub channel: String,

    /// Ordered message history, append-only
    #[serde(default)]
    pub history: Vec<SessionMessage>,

    /// Everything below this index has been consolidated into durable memory
    #[serde(default)]
    pub consolidation_offset: usize,

    /// Session-level metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            channel: channel.into(),
            history: Vec::new(),
            consolidation_offset: 0,
            metadata: serde_json::Map::new(),
        }
    }

    /// Append a message to the history.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(SessionMessage::new(role, content));
    }

    /// The most recent `n` messages.
    pub fn recent(&self, n: usize) -> &[SessionMessage] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// How many messages are waiting to be consolidated.
    pub fn pending_consolidation(&self) -> usize {
        self.history.len().saturating_sub(self.consolidation_offset)
    }

    /// Advance the consolidation offset. The offset never decreases and
    /// never runs past the end of the history.
    pub fn advance_consolidation(&mut self, to: usize) {
        let clamped = to.min(self.history.len());
        if clamped > self.consolidation_offset {
            self.consolidation_offset = clamped;
        }
    }

    /// Clamp a deserialized offset into the valid range.
    pub fn normalize(&mut self) {
        self.consolidation_offset = self.consolidation_offset.min(self.history.len());
    }
}
