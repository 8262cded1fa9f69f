//! Session persistence — one JSON file mapping session_id to state.
//!
//! The whole map is written via write-then-rename after each turn, so a
//! crash mid-persist leaves either the previous or the new complete file.
//! A corrupt file is tolerated by starting empty; the broken file survives
//! on disk until the next successful write replaces it.

use picoagent_core::error::SessionError;
use picoagent_core::session::{Role, SessionMessage, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize, Default)]
struct SessionsFile {
    sessions: Vec<SessionState>,
}

/// Owns every session and its persistence.
pub struct SessionManager {
    path: Option<PathBuf>,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionManager {
    /// In-memory only (tests, one-shot runs).
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Backed by `path`; loads existing sessions from it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sessions = load_sessions(&path);
        debug!(path = %path.display(), count = sessions.len(), "Sessions loaded");
        Self {
            path: Some(path),
            sessions: Mutex::new(sessions),
        }
    }

    /// Append a message, creating the session on first use. Returns the
    /// new history length.
    pub async fn append(
        &self,
        session_id: &str,
        channel: &str,
        role: Role,
        content: &str,
    ) -> usize {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id, channel));
        session.push(role, content);
        session.history.len()
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// The most recent `n` messages of a session.
    pub async fn recent(&self, session_id: &str, n: usize) -> Vec<SessionMessage> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.recent(n).to_vec())
            .unwrap_or_default()
    }

    /// Messages pending consolidation and the current offset.
    pub async fn consolidation_state(&self, session_id: &str) -> (usize, usize) {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| (s.pending_consolidation(), s.consolidation_offset))
            .unwrap_or((0, 0))
    }

    /// Advance a session's consolidation offset (monotone) and persist.
    pub async fn advance_consolidation(&self, session_id: &str, to: usize) {
        {
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get_mut(session_id) {
                session.advance_consolidation(to);
            }
        }
        if let Err(e) = self.save().await {
            warn!(session_id, error = %e, "Failed to persist consolidation offset");
        }
    }

    /// Atomically write all sessions.
    pub async fn save(&self) -> Result<(), SessionError> {
        let Some(path) = &self.path else { return Ok(()) };
        let payload = {
            let sessions = self.sessions.lock().await;
            let mut list: Vec<SessionState> = sessions.values().cloned().collect();
            list.sort_by(|a, b| a.session_id.cmp(&b.session_id));
            serde_json::to_vec_pretty(&SessionsFile { sessions: list })
                .map_err(|e| SessionError::Persistence(format!("encode: {e}")))?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SessionError::Persistence(format!("create dir: {e}")))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)
            .map_err(|e| SessionError::Persistence(format!("write: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| SessionError::Persistence(format!("rename: {e}")))?;
        Ok(())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(session_id).is_some();
        if removed {
            if let Err(e) = self.save().await {
                warn!(session_id, error = %e, "Failed to persist removal");
            }
        }
        removed
    }

    /// Export one session as pretty JSON.
    pub async fn export(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .and_then(|s| serde_json::to_string_pretty(s).ok())
    }

    /// Import a session from JSON, replacing any with the same id.
    pub async fn import(&self, json: &str) -> Result<String, SessionError> {
        let mut session: SessionState = serde_json::from_str(json)
            .map_err(|e| SessionError::Persistence(format!("decode session: {e}")))?;
        session.normalize();
        let id = session.session_id.clone();
        self.sessions.lock().await.insert(id.clone(), session);
        self.save().await?;
        Ok(id)
    }
}

fn load_sessions(path: &std::path::Path) -> HashMap<String, SessionState> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    match serde_json::from_str::<SessionsFile>(&raw) {
        Ok(file) => file
            .sessions
            .into_iter()
            .map(|mut s| {
                s.normalize();
                (s.session_id.clone(), s)
            })
            .collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt sessions file, starting empty");
            HashMap::new()
        }
    }
}
