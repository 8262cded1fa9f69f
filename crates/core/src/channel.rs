//! Channel trait — the contract every chat adapter honors.
//!
//! An adapter delivers inbound messages and accepts an outbound reply.
//! The turn engine is agnostic to the platform behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbound {
    /// Channel tag (e.g. "cli", "telegram")
    pub channel: String,

    /// Platform-specific sender identifier
    pub sender: String,

    /// The text content
    pub text: String,

    /// When the message arrived
    pub ts: DateTime<Utc>,
}

/// The channel contract: poll for inbound messages, send replies.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch pending inbound messages. May await new input.
    async fn poll(&self) -> std::result::Result<Vec<Inbound>, ChannelError>;

    /// Deliver a reply to a sender.
    async fn send(&self, sender: &str, text: &str) -> std::result::Result<(), ChannelError>;

    /// Per-sender allowlist check. Adapters override this with their
    /// configured allowlist; the default admits everyone.
    fn is_allowed(&self, _sender: &str) -> bool {
        true
    }
}

/// Allowlist semantics shared by adapters: empty denies everyone,
/// `"*"` admits everyone, otherwise exact match.
pub fn sender_allowed(allow_from: &[String], sender: &str) -> bool {
    if allow_from.is_empty() {
        return false;
    }
    allow_from.iter().any(|a| a == "*" || a == sender)
}
