//! File tool — read, write, append, and list inside the workspace.
//!
//! Every path is canonicalized (the parent, for not-yet-existing targets)
//! and must resolve inside the workspace root when restriction is on.
//! Writes mark the result data as a reviewable artifact so the subagent
//! pass can pick it up.

use async_trait::async_trait;
use picoagent_core::error::ToolError;
use picoagent_core::tool::{Tool, ToolContext, ToolDescriptor, ToolResult};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::debug;

const MAX_READ_BYTES: usize = 64_000;

/// Workspace-scoped file operations.
pub struct FileTool {
    restrict_to_workspace: bool,
}

impl FileTool {
    pub fn new(restrict_to_workspace: bool) -> Self {
        Self { restrict_to_workspace }
    }

    /// Resolve `raw` against the workspace and enforce the sandbox.
    /// For targets that do not exist yet, the nearest existing ancestor is
    /// canonicalized so symlinks cannot smuggle the path outside.
    fn resolve(&self, raw: &str, workspace: &Path) -> Result<PathBuf, String> {
        let joined = if Path::new(raw).is_absolute() {
            PathBuf::from(raw)
        } else {
            workspace.join(raw)
        };

        let canonical = canonicalize_existing_prefix(&joined);
        if self.restrict_to_workspace {
            let root = workspace
                .canonicalize()
                .unwrap_or_else(|_| workspace.to_path_buf());
            if !canonical.starts_with(&root) {
                return Err(format!("path escapes workspace root: {raw}"));
            }
        }
        Ok(canonical)
    }
}

/// Canonicalize the longest existing prefix, then rejoin the remainder
/// with `..`/`.` components resolved lexically.
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }
    let mut out = existing.canonicalize().unwrap_or(existing);
    for component in tail.iter().rev() {
        if component == ".." {
            out.pop();
        } else if component != "." {
            out.push(component);
        }
    }
    out
}

#[async_trait]
impl Tool for FileTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "file",
            "Read, write, append, or list files inside the workspace root.",
            json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["read", "write", "append", "list"] },
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["action"]
            }),
        )
    }

    async fn run(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let action = args["action"].as_str().unwrap_or("read");
        let raw_path = args["path"].as_str().unwrap_or("").trim();
        let content = args["content"].as_str().unwrap_or("");
        let workspace = &ctx.workspace_root;

        std::fs::create_dir_all(workspace).map_err(|e| ToolError::ExecutionFailed {
            tool: "file".into(),
            reason: format!("create workspace: {e}"),
        })?;

        if action == "list" {
            let target = match self.resolve(if raw_path.is_empty() { "." } else { raw_path }, workspace) {
                Ok(p) => p,
                Err(e) => return Ok(ToolResult::failure(e)),
            };
            if !target.is_dir() {
                return Ok(ToolResult::failure(format!("not a directory: {}", target.display())));
            }
            let mut names: Vec<String> = std::fs::read_dir(&target)
                .map_err(|e| ToolError::ExecutionFailed {
                    tool: "file".into(),
                    reason: e.to_string(),
                })?
                .flatten()
                .map(|entry| {
                    let mut name = entry.file_name().to_string_lossy().to_string();
                    if entry.path().is_dir() {
                        name.push('/');
                    }
                    name
                })
                .collect();
            names.sort();
            let listing = if names.is_empty() { "(empty directory)".into() } else { names.join("\n") };
            return Ok(ToolResult::ok(listing));
        }

        if raw_path.is_empty() {
            return Ok(ToolResult::failure("missing path"));
        }
        let path = match self.resolve(raw_path, workspace) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::failure(e)),
        };

        match action {
            "read" => {
                if !path.is_file() {
                    return Ok(ToolResult::failure(format!("file not found: {}", path.display())));
                }
                let bytes = std::fs::read(&path).map_err(|e| ToolError::ExecutionFailed {
                    tool: "file".into(),
                    reason: e.to_string(),
                })?;
                let truncated = bytes.len() > MAX_READ_BYTES;
                let text =
                    String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_READ_BYTES)]).to_string();
                let output = if truncated {
                    format!("{text}\n… (truncated at {MAX_READ_BYTES} bytes)")
                } else {
                    text
                };
                Ok(ToolResult::ok(output))
            }
            "write" | "append" => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| ToolError::ExecutionFailed {
                        tool: "file".into(),
                        reason: e.to_string(),
                    })?;
                }
                if action == "write" {
                    std::fs::write(&path, content).map_err(|e| ToolError::ExecutionFailed {
                        tool: "file".into(),
                        reason: e.to_string(),
                    })?;
                } else {
                    use std::io::Write;
                    let mut file = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .map_err(|e| ToolError::ExecutionFailed {
                            tool: "file".into(),
                            reason: e.to_string(),
                        })?;
                    file.write_all(content.as_bytes()).map_err(|e| {
                        ToolError::ExecutionFailed { tool: "file".into(), reason: e.to_string() }
                    })?;
                }
                debug!(path = %path.display(), action, bytes = content.len(), "File mutated");
                let mut data = serde_json::Map::new();
                data.insert("artifact".into(), json!(path.display().to_string()));
                data.insert("reviewable".into(), json!(true));
                Ok(ToolResult::ok_with_data(
                    format!("{action}d {} chars to {}", content.chars().count(), path.display()),
                    data,
                ))
            }
            other => Ok(ToolResult::failure(format!("unsupported action: {other}"))),
        }
    }
}
