//! Built-in tool implementations for picoagent.
//!
//! Tools give the agent the ability to act: run shell commands, read and
//! write files, search the web. Security defaults:
//! - Shell: destructive command patterns are denied, and absolute paths
//!   outside the workspace are blocked when workspace restriction is on.
//!   This is advisory hardening, not a sandbox — real isolation needs OS
//!   support.
//! - File: every path is canonicalized and must resolve inside the
//!   workspace root when restriction is on.

pub mod file;
pub mod search;
pub mod shell;

use picoagent_config::AppConfig;
use picoagent_core::error::ToolError;
use picoagent_core::tool::ToolRegistry;
use std::time::Duration;

pub use file::FileTool;
pub use search::SearchTool;
pub use shell::ShellTool;

/// Build the registry the config asks for, honoring the allow flags and
/// the registry-level timeout/cache settings.
pub fn default_registry(config: &AppConfig) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new()
        .with_global_timeout(Duration::from_secs(config.tool_timeout_seconds))
        .with_cache_ttl(Duration::from_secs(config.tool_cache_ttl_seconds));

    if config.allow_shell {
        registry.register(Box::new(ShellTool::new(
            config.restrict_to_workspace,
            config.shell_deny_patterns.clone(),
        )))?;
    }
    if config.allow_file_tool {
        registry.register(Box::new(FileTool::new(config.restrict_to_workspace)))?;
    }
    registry.register(Box::new(SearchTool::new()))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_honors_allow_flags() {
        let mut config = AppConfig::default();
        config.allow_shell = false;
        config.allow_file_tool = true;
        let registry = default_registry(&config).unwrap();
        let names = registry.names();
        assert!(!names.contains(&"shell".to_string()));
        assert!(names.contains(&"file".to_string()));
        assert!(names.contains(&"search".to_string()));
    }

    #[test]
    fn full_registry_has_three_tools() {
        let registry = default_registry(&AppConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["file", "search", "shell"]);
    }
}
