//! Provider trait — the abstraction over LLM backends.
//!
//! A provider supplies five operations to the turn engine: embeddings, free
//! chat, tool scoring, argument planning, and response synthesis. Every
//! backend (OpenAI-compatible, Anthropic, the offline heuristic) implements
//! this trait; the loop never knows which one it is talking to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProviderError;
use crate::session::Role;
use crate::tool::{ToolDescriptor, ToolResult};

/// A message in a provider chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Options for a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOptions {
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: Some(800),
            stop: Vec::new(),
        }
    }
}

/// Non-negative usefulness scores per tool name.
///
/// Backed by a `BTreeMap` so iteration order (and therefore tie-breaking
/// downstream) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolScores(BTreeMap<String, f64>);

impl ToolScores {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a score, clamping negatives to zero.
    pub fn insert(&mut self, name: impl Into<String>, score: f64) {
        self.0.insert(name.into(), score.max(0.0));
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Highest-scoring entry; ties resolve to the lexicographically
    /// smallest name.
    pub fn top(&self) -> Option<(&str, f64)> {
        self.iter()
            .fold(None, |best: Option<(&str, f64)>, (name, score)| match best {
                Some((_, bs)) if score <= bs => best,
                _ => Some((name, score)),
            })
    }
}

impl FromIterator<(String, f64)> for ToolScores {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        let mut scores = Self::new();
        for (name, score) in iter {
            scores.insert(name, score);
        }
        scores
    }
}

/// The scoring/planning/chat surface the turn engine depends on.
///
/// Implementations must be side-effect free from the loop's perspective:
/// errors are reported, never panicked, and the loop recovers by falling
/// back to the local heuristic client.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// A human-readable name for this client (e.g. "openrouter", "heuristic").
    fn name(&self) -> &str;

    /// Embed each text into a fixed-dimension vector.
    async fn embed(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    /// Free-form chat.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> std::result::Result<String, ProviderError>;

    /// Score each tool's usefulness for the user message.
    async fn score_tools(
        &self,
        system_prompt: &str,
        user_message: &str,
        tools: &[ToolDescriptor],
    ) -> std::result::Result<ToolScores, ProviderError>;

    /// Produce an argument object for the chosen tool.
    async fn plan_tool_args(
        &self,
        user_message: &str,
        tool: &ToolDescriptor,
        context: &str,
    ) -> std::result::Result<serde_json::Value, ProviderError>;

    /// Compose the final user-facing answer.
    async fn synthesize_response(
        &self,
        user_message: &str,
        tool_result: Option<&ToolResult>,
        memory_snippets: &[String],
    ) -> std::result::Result<String, ProviderError>;

    /// Can we reach the backend? Offline clients are always healthy.
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_clamp_negatives() {
        let mut scores = ToolScores::new();
        scores.insert("shell", -3.0);
        assert_eq!(scores.get("shell"), Some(0.0));
    }

    #[test]
    fn top_breaks_ties_by_name() {
        let scores: ToolScores = vec![
            ("search".to_string(), 1.0),
            ("file".to_string(), 1.0),
            ("shell".to_string(), 1.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(scores.top().map(|(n, _)| n), Some("file"));
    }

    #[test]
    fn total_sums_scores() {
        let scores: ToolScores =
            vec![("a".to_string(), 9.0), ("b".to_string(), 1.0)].into_iter().collect();
        assert!((scores.total() - 10.0).abs() < f64::EPSILON);
    }
}
