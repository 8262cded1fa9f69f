//! Configuration loading, validation, and management for picoagent.
//!
//! Loads JSON from `~/.picoagent/config.json` with environment variable
//! overrides, validates at startup, and writes the file with 0600
//! permissions on unix. A missing file yields defaults; a malformed one is
//! fatal (exit code 2 at the CLI).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration. Maps directly to `~/.picoagent/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider spec name (openrouter, openai, anthropic, ...)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Chat model override; the provider spec's default otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_model: Option<String>,

    /// Embedding model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,

    /// Env var holding the API key; the provider spec's default otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Upper bound on tool executions per turn
    #[serde(default = "default_max_tool_chain")]
    pub max_tool_chain: u32,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_seconds: u64,

    #[serde(default = "default_cache_ttl")]
    pub tool_cache_ttl_seconds: u64,

    #[serde(default = "default_turn_deadline")]
    pub turn_deadline_seconds: u64,

    /// Root directory tools operate in ("~" expands to $HOME)
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,

    /// MCP server launch specs (config surface; wiring is external)
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,

    #[serde(default = "default_true")]
    pub allow_shell: bool,

    #[serde(default = "default_true")]
    pub allow_file_tool: bool,

    #[serde(default = "default_true")]
    pub restrict_to_workspace: bool,

    /// Extra deny patterns merged with the shell tool's built-ins
    #[serde(default)]
    pub shell_deny_patterns: Vec<String>,

    #[serde(default = "default_entropy_threshold")]
    pub entropy_threshold_bits: f64,

    #[serde(default = "default_true")]
    pub adaptive_threshold_enabled: bool,

    #[serde(default)]
    pub memory: MemorySettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub subagent: SubagentSettings,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_max_tool_chain() -> u32 {
    3
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_cache_ttl() -> u64 {
    60
}
fn default_turn_deadline() -> u64 {
    120
}
fn default_workspace_root() -> String {
    "~/.picoagent/workspace".into()
}
fn default_true() -> bool {
    true
}
fn default_entropy_threshold() -> f64 {
    1.5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Allowlist of sender IDs. Empty = deny all. ["*"] = allow all.
    #[serde(default)]
    pub allow_from: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_tool_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,

    #[serde(default = "default_max_records")]
    pub max_records: usize,

    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_half_life_days() -> f64 {
    7.0
}
fn default_max_records() -> usize {
    10_000
}
fn default_top_k() -> usize {
    5
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            half_life_days: default_half_life_days(),
            max_records: default_max_records(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Pending-message count that triggers consolidation
    #[serde(default = "default_consolidation_window")]
    pub consolidation_window: usize,

    /// Recent-history window included in the prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_consolidation_window() -> usize {
    20
}
fn default_history_window() -> usize {
    12
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            consolidation_window: default_consolidation_window(),
            history_window: default_history_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_subagent_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_subagent_budget")]
    pub budget_seconds: u64,
}

fn default_subagent_confidence() -> f64 {
    0.7
}
fn default_subagent_budget() -> u64 {
    5
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: default_subagent_confidence(),
            budget_seconds: default_subagent_budget(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            chat_model: None,
            embedding_model: None,
            api_key_env: None,
            max_tool_chain: default_max_tool_chain(),
            tool_timeout_seconds: default_tool_timeout(),
            tool_cache_ttl_seconds: default_cache_ttl(),
            turn_deadline_seconds: default_turn_deadline(),
            workspace_root: default_workspace_root(),
            channels: BTreeMap::new(),
            mcp_servers: Vec::new(),
            allow_shell: true,
            allow_file_tool: true,
            restrict_to_workspace: true,
            shell_deny_patterns: Vec::new(),
            entropy_threshold_bits: default_entropy_threshold(),
            adaptive_threshold_enabled: true,
            memory: MemorySettings::default(),
            session: SessionSettings::default(),
            subagent: SubagentSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load from the default path with env overrides applied.
    ///
    /// - `PICOAGENT_PROVIDER` overrides `provider`
    /// - `PICOAGENT_MODEL` overrides `chat_model`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Ok(provider) = std::env::var("PICOAGENT_PROVIDER") {
            config.provider = provider;
        }
        if let Ok(model) = std::env::var("PICOAGENT_MODEL") {
            config.chat_model = Some(model);
        }
        Ok(config)
    }

    /// Load from a specific file. Missing file → defaults; malformed file
    /// or invalid values → error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write to `path` with 0600 permissions on unix.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Read {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        let payload = serde_json::to_vec_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, payload).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tool_chain == 0 {
            return Err(ConfigError::Validation("max_tool_chain must be >= 1".into()));
        }
        if self.tool_timeout_seconds == 0 {
            return Err(ConfigError::Validation("tool_timeout_seconds must be >= 1".into()));
        }
        if self.entropy_threshold_bits < 0.0 {
            return Err(ConfigError::Validation(
                "entropy_threshold_bits must be >= 0".into(),
            ));
        }
        if self.memory.half_life_days <= 0.0 {
            return Err(ConfigError::Validation("memory.half_life_days must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.subagent.min_confidence) {
            return Err(ConfigError::Validation(
                "subagent.min_confidence must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    // ── Well-known paths ───────────────────────────────────────────────

    pub fn config_dir() -> PathBuf {
        home_dir().join(".picoagent")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    pub fn sessions_path() -> PathBuf {
        Self::config_dir().join("sessions.json")
    }

    pub fn memory_path() -> PathBuf {
        Self::config_dir().join("memory.bin")
    }

    pub fn threshold_path() -> PathBuf {
        Self::config_dir().join("threshold.json")
    }

    pub fn skills_dir() -> PathBuf {
        Self::config_dir().join("skills")
    }

    pub fn skill_usage_path() -> PathBuf {
        Self::config_dir().join("skill_usage.jsonl")
    }

    /// The workspace root with `~` expanded.
    pub fn workspace_root_path(&self) -> PathBuf {
        expand_tilde(&self.workspace_root)
    }

    /// Consolidation artifacts live under the workspace.
    pub fn dual_memory_dir(&self) -> PathBuf {
        self.workspace_root_path().join("memory")
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return home_dir();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home_dir().join(rest);
    }
    PathBuf::from(path)
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse config at {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}
