//! Offline fallback client — deterministic keyword rules, no network.
//!
//! This is the floor the runtime degrades to when no provider is
//! configured or a configured provider errors. Embeddings are a hashed
//! bag of words, tool scores come from keyword rules, and argument plans
//! are pattern-matched from the message. Every operation is infallible.

use async_trait::async_trait;
use picoagent_core::error::ProviderError;
use picoagent_core::provider::{ChatMessage, ChatOptions, ProviderClient, ToolScores};
use picoagent_core::tool::{ToolDescriptor, ToolResult};

/// Dimension of the hashed bag-of-words embedding space.
pub const HEURISTIC_EMBEDDING_DIM: usize = 256;

const BASE_SCORE: f64 = 0.1;
const KEYWORD_BOOST: f64 = 1.5;

/// The deterministic offline client.
#[derive(Debug, Clone, Default)]
pub struct LocalHeuristicClient;

impl LocalHeuristicClient {
    pub fn new() -> Self {
        Self
    }

    fn embed_one(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; HEURISTIC_EMBEDDING_DIM];
        for token in tokens(text) {
            vector[token_bucket(&token)] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn score_one(tool_name: &str, text: &str) -> f64 {
        let name = tool_name.to_lowercase();
        let mut score = BASE_SCORE;
        if name.contains("search")
            && contains_any(text, &["search", "find", "web", "lookup", "google"])
        {
            score += KEYWORD_BOOST;
        }
        if name.contains("file")
            && contains_any(text, &["file", "read", "write", "folder", "path", ".md", ".rs", ".txt"])
        {
            score += KEYWORD_BOOST;
        }
        if name.contains("shell")
            && contains_any(text, &["run", "command", "terminal", "ls", "cat", "grep", "git"])
        {
            score += KEYWORD_BOOST;
        }
        score
    }

    fn plan_one(tool_name: &str, message: &str) -> serde_json::Value {
        let text = message.trim();
        let name = tool_name.to_lowercase();

        if name.contains("search") {
            return serde_json::json!({ "query": text });
        }

        if name.contains("shell") {
            let cleaned = text
                .strip_prefix("run ")
                .or_else(|| text.strip_prefix("execute "))
                .or_else(|| text.strip_prefix("command "))
                .unwrap_or(text)
                .trim();
            return serde_json::json!({ "command": if cleaned.is_empty() { text } else { cleaned } });
        }

        if name.contains("file") {
            let words: Vec<&str> = text.split_whitespace().collect();
            if let Some(i) = words.iter().position(|w| w.eq_ignore_ascii_case("read")) {
                if let Some(path) = words.get(i + 1) {
                    return serde_json::json!({ "action": "read", "path": path });
                }
            }
            if let Some(i) = words.iter().position(|w| w.eq_ignore_ascii_case("write")) {
                let rest = words[i + 1..].join(" ");
                if let Some((path, content)) = rest.split_once(':') {
                    return serde_json::json!({
                        "action": "write",
                        "path": path.trim(),
                        "content": content.trim(),
                    });
                }
            }
            if words.iter().any(|w| w.eq_ignore_ascii_case("list")) {
                return serde_json::json!({ "action": "list", "path": "." });
            }
            return serde_json::json!({ "action": "read", "path": text });
        }

        serde_json::json!({ "query": text })
    }
}

#[async_trait]
impl ProviderClient for LocalHeuristicClient {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == picoagent_core::Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let preview: String = last_user.chars().take(160).collect();
        Ok(format!(
            "I am running offline without a configured model. Noted: {preview}"
        ))
    }

    async fn score_tools(
        &self,
        _system_prompt: &str,
        user_message: &str,
        tools: &[ToolDescriptor],
    ) -> Result<ToolScores, ProviderError> {
        let text = user_message.to_lowercase();
        Ok(tools
            .iter()
            .map(|t| (t.name.clone(), Self::score_one(&t.name, &text)))
            .collect())
    }

    async fn plan_tool_args(
        &self,
        user_message: &str,
        tool: &ToolDescriptor,
        _context: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        Ok(Self::plan_one(&tool.name, user_message))
    }

    async fn synthesize_response(
        &self,
        _user_message: &str,
        tool_result: Option<&ToolResult>,
        memory_snippets: &[String],
    ) -> Result<String, ProviderError> {
        let mut lines = Vec::new();
        match tool_result {
            Some(result) if result.success => {
                lines.push(result.output.trim().to_string());
            }
            Some(result) => {
                lines.push(format!(
                    "The tool reported a problem: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                ));
            }
            None => lines.push("No tool was needed for this request.".to_string()),
        }
        if !memory_snippets.is_empty() {
            lines.push(format!("(drawing on {} remembered items)", memory_snippets.len()));
        }
        Ok(lines.join("\n"))
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stable FNV-1a bucket assignment, fixed across platforms and releases so
/// stored embeddings stay comparable.
fn token_bucket(token: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x1000_0000_01b3);
    }
    (hash % HEURISTIC_EMBEDDING_DIM as u64) as usize
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}
