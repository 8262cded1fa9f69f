//! Error types for the picoagent domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all picoagent operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Skill error: {0}")]
    Skill(#[from] SkillError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Malformed provider response: {0}")]
    Decode(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Operation not supported by provider: {0}")]
    NotSupported(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Memory persistence failed: {0}")]
    Persistence(String),

    #[error("Invalid memory record: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("A tool named '{0}' is already registered")]
    NameConflict(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {}", violations.join("; "))]
    Validation { violations: Vec<String> },

    #[error("Tool '{tool}' timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("Tool '{tool}' failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("Circular skill dependency: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Skill storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed on {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Unauthorized sender: {sender} on {channel}")]
    Unauthorized { channel: String, sender: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session persistence failed: {0}")]
    Persistence(String),
}
