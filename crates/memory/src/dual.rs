//! Dual memory — consolidation of long sessions into durable Markdown.
//!
//! Two artifacts under the workspace memory directory:
//! - `HISTORY.md`: append-only chronological summary lines, grep-friendly.
//! - `MEMORY.md`: section-structured long-term notes, rewritten atomically.
//!
//! Consolidation runs as a background task and never blocks a turn; the
//! caller advances the session's consolidation offset only when a run
//! reports success.

use chrono::{DateTime, Utc};
use picoagent_core::error::{Error, ProviderError};
use picoagent_core::provider::{ChatMessage, ChatOptions, ProviderClient};
use picoagent_core::session::SessionMessage;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

const MAX_BULLETS: usize = 3;

/// A snapshot of the messages to consolidate, taken while the turn still
/// holds the session.
#[derive(Debug, Clone)]
pub struct ConsolidationRequest {
    pub session_id: String,
    /// Messages `[offset, offset + window)` from the session history
    pub messages: Vec<SessionMessage>,
    /// The offset the session should advance to on success
    pub new_offset: usize,
}

#[derive(Debug, Deserialize)]
struct ConsolidationReply {
    history_entry: String,
    #[serde(default)]
    memory_bullets: Vec<String>,
}

/// Store for the two consolidation artifacts.
///
/// `HISTORY.md` and `MEMORY.md` are shared across every session, so their
/// read-modify-write cycle is guarded by one store-wide async lock; the
/// per-session in-flight set only coalesces duplicate triggers.
pub struct DualMemoryStore {
    memory_dir: PathBuf,
    in_flight: Mutex<HashSet<String>>,
    artifact_lock: tokio::sync::Mutex<()>,
}

impl DualMemoryStore {
    pub fn new(memory_dir: impl Into<PathBuf>) -> Self {
        Self {
            memory_dir: memory_dir.into(),
            in_flight: Mutex::new(HashSet::new()),
            artifact_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.memory_dir.join("HISTORY.md")
    }

    pub fn memory_path(&self) -> PathBuf {
        self.memory_dir.join("MEMORY.md")
    }

    /// Long-term notes, for inclusion in the system prompt.
    pub fn read_long_term(&self) -> String {
        std::fs::read_to_string(self.memory_path()).unwrap_or_default()
    }

    pub fn memory_context(&self) -> Option<String> {
        let long_term = self.read_long_term();
        if long_term.trim().is_empty() {
            None
        } else {
            Some(format!("## Long-term Memory\n{long_term}"))
        }
    }

    /// Claim the consolidation slot for a session. Returns false when a
    /// task is already running for it (the new trigger is coalesced).
    pub fn try_begin(&self, session_id: &str) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight lock")
            .insert(session_id.to_string())
    }

    /// Release the consolidation slot.
    pub fn finish(&self, session_id: &str) {
        self.in_flight.lock().expect("in-flight lock").remove(session_id);
    }

    /// Run one consolidation: ask the provider for a history line and up to
    /// three semantic bullets, then append/rewrite the artifacts. Returns
    /// the offset to advance to.
    pub async fn consolidate(
        &self,
        request: &ConsolidationRequest,
        provider: &dyn ProviderClient,
    ) -> Result<usize, Error> {
        if request.messages.is_empty() {
            return Ok(request.new_offset);
        }

        let transcript: Vec<String> = request
            .messages
            .iter()
            .map(|m| {
                format!(
                    "[{}] {}: {}",
                    m.timestamp.format("%Y-%m-%d %H:%M"),
                    m.role.to_string().to_uppercase(),
                    m.content
                )
            })
            .collect();

        let prompt = format!(
            "Consolidate this conversation slice into durable memory. Respond with a \
             single JSON object holding exactly two keys:\n\
             1. \"history_entry\": one line summarizing key events/decisions/topics, \
             starting with [YYYY-MM-DD HH:MM]. Include detail useful for grep search.\n\
             2. \"memory_bullets\": an array of at most three short semantic facts worth \
             keeping long-term (may be empty).\n\
             No markdown fences, no text outside the JSON.\n\n\
             ## Conversation\n{}",
            transcript.join("\n")
        );

        let raw = provider
            .chat(
                &[
                    ChatMessage::system(
                        "You are a memory consolidation agent. Return only valid JSON.",
                    ),
                    ChatMessage::user(prompt),
                ],
                &ChatOptions::default(),
            )
            .await?;

        let reply: ConsolidationReply = serde_json::from_str(strip_fences(&raw))
            .map_err(|e| ProviderError::Decode(format!("consolidation reply: {e}")))?;

        // Tasks for different sessions share the artifact files; serialize
        // both writes so neither update is lost.
        let _artifacts = self.artifact_lock.lock().await;
        self.append_history(&reply.history_entry)?;
        let bullets: Vec<&String> = reply.memory_bullets.iter().take(MAX_BULLETS).collect();
        if !bullets.is_empty() {
            self.append_notes(&request.session_id, Utc::now(), &bullets)?;
        }

        debug!(
            session_id = %request.session_id,
            new_offset = request.new_offset,
            "Session slice consolidated"
        );
        Ok(request.new_offset)
    }

    /// Append one entry to HISTORY.md.
    fn append_history(&self, entry: &str) -> Result<(), Error> {
        std::fs::create_dir_all(&self.memory_dir)
            .map_err(|e| Error::Internal(format!("create memory dir: {e}")))?;
        let mut current = std::fs::read_to_string(self.history_path()).unwrap_or_default();
        current.push_str(entry.trim_end());
        current.push_str("\n\n");
        atomic_write(&self.history_path(), current.as_bytes())
    }

    /// Append semantic bullets to MEMORY.md under a dated section.
    fn append_notes(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
        bullets: &[&String],
    ) -> Result<(), Error> {
        std::fs::create_dir_all(&self.memory_dir)
            .map_err(|e| Error::Internal(format!("create memory dir: {e}")))?;
        let mut content = std::fs::read_to_string(self.memory_path()).unwrap_or_default();
        if content.trim().is_empty() {
            content = "# Long-term Memory\n".to_string();
        }
        content.push_str(&format!(
            "\n## {} ({session_id})\n",
            at.format("%Y-%m-%d")
        ));
        for bullet in bullets {
            content.push_str(&format!("- {}\n", bullet.trim()));
        }
        atomic_write(&self.memory_path(), content.as_bytes())
    }
}

/// Spawn a background consolidation that reports the advanced offset
/// through `on_success`. Failures are logged and dropped; the in-flight
/// slot is always released.
pub fn spawn_consolidation<F>(
    store: std::sync::Arc<DualMemoryStore>,
    provider: std::sync::Arc<dyn ProviderClient>,
    request: ConsolidationRequest,
    on_success: F,
) where
    F: FnOnce(usize) + Send + 'static,
{
    tokio::spawn(async move {
        let session_id = request.session_id.clone();
        match store.consolidate(&request, provider.as_ref()).await {
            Ok(new_offset) => on_success(new_offset),
            Err(e) => warn!(session_id = %session_id, error = %e, "Consolidation failed"),
        }
        store.finish(&session_id);
    });
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)
        .map_err(|e| Error::Internal(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| Error::Internal(format!("rename {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use picoagent_core::provider::ToolScores;
    use picoagent_core::session::{Role, SessionMessage};
    use picoagent_core::tool::{ToolDescriptor, ToolResult};

    /// Provider stub returning a fixed chat reply.
    struct StubProvider {
        reply: String,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ProviderClient for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| vec![0.0f32; 4]).collect())
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<String, ProviderError> {
            if self.fail {
                Err(ProviderError::Transport("stub offline".into()))
            } else {
                Ok(self.reply.clone())
            }
        }

        async fn score_tools(
            &self,
            _system_prompt: &str,
            _user_message: &str,
            _tools: &[ToolDescriptor],
        ) -> Result<ToolScores, ProviderError> {
            Ok(ToolScores::new())
        }

        async fn plan_tool_args(
            &self,
            _user_message: &str,
            _tool: &ToolDescriptor,
            _context: &str,
        ) -> Result<serde_json::Value, ProviderError> {
            Ok(serde_json::json!({}))
        }

        async fn synthesize_response(
            &self,
            _user_message: &str,
            _tool_result: Option<&ToolResult>,
            _memory_snippets: &[String],
        ) -> Result<String, ProviderError> {
            Ok(String::new())
        }
    }

    fn request(n: usize) -> ConsolidationRequest {
        ConsolidationRequest {
            session_id: "cli:local".into(),
            messages: (0..n)
                .map(|i| SessionMessage::new(Role::User, format!("message {i}")))
                .collect(),
            new_offset: n,
        }
    }

    #[tokio::test]
    async fn consolidation_appends_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = DualMemoryStore::new(dir.path());
        let provider = StubProvider {
            reply: r#"{"history_entry": "[2026-08-01 12:00] Discussed deploy pipeline.", "memory_bullets": ["User deploys on Fridays", "Staging is at stage.example.com"]}"#.into(),
            fail: false,
        };

        let new_offset = store.consolidate(&request(5), &provider).await.unwrap();
        assert_eq!(new_offset, 5);

        let history = std::fs::read_to_string(store.history_path()).unwrap();
        assert!(history.contains("Discussed deploy pipeline"));

        let memory = std::fs::read_to_string(store.memory_path()).unwrap();
        assert!(memory.contains("User deploys on Fridays"));
        assert!(memory.contains("# Long-term Memory"));
    }

    #[tokio::test]
    async fn history_is_append_only_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = DualMemoryStore::new(dir.path());
        let provider = StubProvider {
            reply: r#"{"history_entry": "[2026-08-01 12:00] entry", "memory_bullets": []}"#.into(),
            fail: false,
        };

        store.consolidate(&request(3), &provider).await.unwrap();
        store.consolidate(&request(3), &provider).await.unwrap();

        let history = std::fs::read_to_string(store.history_path()).unwrap();
        assert_eq!(history.matches("entry").count(), 2);
    }

    #[tokio::test]
    async fn provider_failure_is_an_error_not_a_partial_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = DualMemoryStore::new(dir.path());
        let provider = StubProvider { reply: String::new(), fail: true };

        assert!(store.consolidate(&request(3), &provider).await.is_err());
        assert!(!store.history_path().exists());
        assert!(!store.memory_path().exists());
    }

    #[tokio::test]
    async fn malformed_reply_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DualMemoryStore::new(dir.path());
        let provider = StubProvider { reply: "not json at all".into(), fail: false };

        let err = store.consolidate(&request(3), &provider).await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Decode(_))));
    }

    #[tokio::test]
    async fn fenced_json_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let store = DualMemoryStore::new(dir.path());
        let provider = StubProvider {
            reply: "```json\n{\"history_entry\": \"[2026-08-01 12:00] fenced\", \"memory_bullets\": []}\n```".into(),
            fail: false,
        };
        store.consolidate(&request(2), &provider).await.unwrap();
        let history = std::fs::read_to_string(store.history_path()).unwrap();
        assert!(history.contains("fenced"));
    }

    #[test]
    fn bullets_are_capped_at_three() {
        let dir = tempfile::tempdir().unwrap();
        let store = DualMemoryStore::new(dir.path());
        let bullets: Vec<String> = (0..5).map(|i| format!("fact {i}")).collect();
        let refs: Vec<&String> = bullets.iter().take(MAX_BULLETS).collect();
        store
            .append_notes("cli:local", Utc::now(), &refs)
            .unwrap();
        let memory = std::fs::read_to_string(store.memory_path()).unwrap();
        assert!(memory.contains("fact 2"));
        assert!(!memory.contains("fact 3"));
    }

    #[test]
    fn in_flight_coalescing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DualMemoryStore::new(dir.path());
        assert!(store.try_begin("s1"));
        assert!(!store.try_begin("s1"), "second trigger must be coalesced");
        assert!(store.try_begin("s2"), "other sessions are independent");
        store.finish("s1");
        assert!(store.try_begin("s1"));
    }
}
