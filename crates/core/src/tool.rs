//! Tool trait and registry — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world: run shell
//! commands, read/write files, search the web. The registry owns argument
//! validation, a fingerprint-keyed result cache, and hard execution
//! timeouts, so individual tools stay small.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::schema::validate_args;

/// Normalizer applied to arguments before fingerprinting, so tools can
/// canonicalize inputs that differ textually but not semantically.
pub type FingerprintNormalizer = fn(&mut serde_json::Value);

/// Describes a tool: its name, what it does, and the shape of its arguments.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Unique name within a registry (e.g. "shell", "file")
    pub name: String,

    /// Description of what the tool does (sent to the provider for scoring)
    pub description: String,

    /// JSON-schema subset describing the tool's parameters
    pub parameters: serde_json::Value,

    /// Whether results may be served from the cache
    pub cacheable: bool,

    /// Per-tool timeout override, bounded by the registry's global timeout
    pub timeout_seconds: Option<u64>,

    /// Optional argument normalizer applied before fingerprinting
    pub fingerprint_normalizer: Option<FingerprintNormalizer>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            cacheable: false,
            timeout_seconds: None,
            fingerprint_normalizer: None,
        }
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }

    pub fn fingerprint_normalizer(mut self, f: FingerprintNormalizer) -> Self {
        self.fingerprint_normalizer = Some(f);
        self
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("cacheable", &self.cacheable)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// The result of a tool execution.
///
/// Invariant: when `success` is false, `error` is non-empty and `data` is
/// empty. The constructors maintain this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Human-readable output
    pub output: String,

    /// Structured data for chaining and review gating
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: serde_json::Map<String, serde_json::Value>,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Error description when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock execution time
    #[serde(default)]
    pub latency_ms: u64,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            data: serde_json::Map::new(),
            success: true,
            error: None,
            latency_ms: 0,
        }
    }

    pub fn ok_with_data(
        output: impl Into<String>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            output: output.into(),
            data,
            success: true,
            error: None,
            latency_ms: 0,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            output: error.clone(),
            data: serde_json::Map::new(),
            success: false,
            error: Some(error),
            latency_ms: 0,
        }
    }
}

/// Ambient context passed to every tool run.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Root directory tools are scoped to
    pub workspace_root: PathBuf,

    /// The session this run belongs to, if any
    pub session_id: Option<String>,
}

impl ToolContext {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// The core Tool trait. Runners must honor cooperative cancellation: the
/// registry drops the future on timeout.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn run(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError>;
}

const DEFAULT_GLOBAL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 512;

/// A registry of available tools.
///
/// Owns the result cache. Execution goes through `run`, which validates
/// arguments, consults the cache, and enforces the timeout.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    cache: Mutex<ResultCache>,
    global_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            cache: Mutex::new(ResultCache::new(
                Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
                DEFAULT_CACHE_MAX_ENTRIES,
            )),
            global_timeout: Duration::from_secs(DEFAULT_GLOBAL_TIMEOUT_SECS),
        }
    }

    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = timeout;
        self
    }

    pub fn with_cache_ttl(self, ttl: Duration) -> Self {
        self.cache.lock().expect("cache lock").ttl = ttl;
        self
    }

    pub fn with_cache_capacity(self, max_entries: usize) -> Self {
        self.cache.lock().expect("cache lock").max_entries = max_entries;
        self
    }

    /// Register a tool. Duplicate names fail with `NameConflict`.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.descriptor().name;
        if self.tools.contains_key(&name) {
            return Err(ToolError::NameConflict(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// All registered descriptors, sorted by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn get_descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|t| t.descriptor())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Structural check of `args` against the named tool's schema.
    pub fn validate(
        &self,
        name: &str,
        args: &serde_json::Value,
    ) -> std::result::Result<(), ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let violations = validate_args(args, &tool.descriptor().parameters);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ToolError::Validation { violations })
        }
    }

    /// Execute a tool: validate, consult the cache, run under a hard
    /// timeout, and cache successful cacheable results.
    ///
    /// Runner errors are folded into a failed `ToolResult`; only lookup and
    /// validation problems surface as `Err`.
    pub async fn run(
        &self,
        name: &str,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let descriptor = tool.descriptor();

        let violations = validate_args(args, &descriptor.parameters);
        if !violations.is_empty() {
            return Err(ToolError::Validation { violations });
        }

        let cache_key = if descriptor.cacheable {
            let key = fingerprint(&descriptor, args);
            if let Some(hit) = self.cache.lock().expect("cache lock").get(&key) {
                debug!(tool = name, "Tool cache hit");
                return Ok(hit);
            }
            Some(key)
        } else {
            None
        };

        let timeout = descriptor
            .timeout_seconds
            .map(Duration::from_secs)
            .map(|t| t.min(self.global_timeout))
            .unwrap_or(self.global_timeout);

        let start = Instant::now();
        let mut result =
            match tokio::time::timeout(timeout, tool.run(args.clone(), ctx)).await {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => {
                    warn!(tool = name, error = %err, "Tool runner failed");
                    ToolResult::failure(err.to_string())
                }
                Err(_) => {
                    warn!(tool = name, timeout_secs = timeout.as_secs(), "Tool timed out");
                    ToolResult::failure("timeout")
                }
            };
        result.latency_ms = start.elapsed().as_millis() as u64;

        // Timeouts and failures are never cached.
        if result.success {
            if let Some(key) = cache_key {
                self.cache
                    .lock()
                    .expect("cache lock")
                    .put(key, result.clone());
            }
        }

        Ok(result)
    }

    /// Drop all cached results.
    pub fn clear_cache(&self) {
        self.cache.lock().expect("cache lock").clear();
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Result cache ───────────────────────────────────────────────────────

struct ResultCache {
    entries: HashMap<String, (ToolResult, Instant)>,
    // Most recently used at the back
    order: Vec<String>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            ttl,
            max_entries,
        }
    }

    fn get(&mut self, key: &str) -> Option<ToolResult> {
        let fresh = match self.entries.get(key) {
            Some((result, inserted)) if inserted.elapsed() <= self.ttl => Some(result.clone()),
            Some(_) => None,
            None => return None,
        };
        match fresh {
            Some(result) => {
                self.touch(key);
                Some(result)
            }
            None => {
                self.entries.remove(key);
                self.order.retain(|k| k != key);
                None
            }
        }
    }

    fn put(&mut self, key: String, result: ToolResult) {
        if self.entries.insert(key.clone(), (result, Instant::now())).is_none() {
            self.order.push(key.clone());
        }
        self.touch(&key);
        while self.entries.len() > self.max_entries && !self.order.is_empty() {
            let evicted = self.order.remove(0);
            self.entries.remove(&evicted);
        }
    }

    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push(key.to_string());
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

// ── Fingerprinting ─────────────────────────────────────────────────────

/// Stable cache key over (tool name, canonical args).
pub fn fingerprint(descriptor: &ToolDescriptor, args: &serde_json::Value) -> String {
    let mut canonical = args.clone();
    if let Some(normalize) = descriptor.fingerprint_normalizer {
        normalize(&mut canonical);
    }
    let canonical = canonicalize(&canonical);
    let serialized = serde_json::to_string(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(descriptor.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(serialized.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Canonical form for fingerprinting: nulls dropped, object keys sorted,
/// whitespace runs in strings collapsed to single spaces.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                let v = &map[key];
                if v.is_null() {
                    continue;
                }
                out.insert(key.clone(), canonicalize(v));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        serde_json::Value::String(s) => {
            let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
            serde_json::Value::String(collapsed)
        }
        other => other.clone(),
    }
}
