//! Prompt construction and reply parsing shared by the HTTP clients.
//!
//! Scoring and planning ride on plain chat completions: the model is asked
//! for a strict JSON object, and the reply is parsed defensively (markdown
//! fences stripped, non-numeric scores dropped to zero).

use picoagent_core::error::ProviderError;
use picoagent_core::provider::ToolScores;
use picoagent_core::tool::{ToolDescriptor, ToolResult};

pub(crate) const ROUTING_SYSTEM_PROMPT: &str =
    "You are a routing model. Return strict JSON only.";
pub(crate) const PLANNING_SYSTEM_PROMPT: &str = "Return a strict JSON object only.";
pub(crate) const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub(crate) fn score_tools_prompt(user_message: &str, tools: &[ToolDescriptor]) -> String {
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect();
    format!(
        "Score each tool from 0 to 1 for how useful it is for the user request. \
         Return a JSON object only; keys must be tool names, values numbers.\n\n\
         User request:\n{user_message}\n\nTools:\n{}",
        tool_lines.join("\n")
    )
}

pub(crate) fn plan_args_prompt(user_message: &str, tool: &ToolDescriptor, context: &str) -> String {
    let mut prompt = format!(
        "Produce JSON arguments for this tool call. Return a JSON object only.\n\n\
         Tool: {}\nDescription: {}\nParameter schema: {}\nUser request: {user_message}",
        tool.name, tool.description, tool.parameters
    );
    if !context.is_empty() {
        prompt.push_str(&format!("\nAdditional context:\n{context}"));
    }
    prompt
}

pub(crate) fn synthesize_prompt(
    user_message: &str,
    tool_result: Option<&ToolResult>,
    memory_snippets: &[String],
) -> String {
    let memory_block = if memory_snippets.is_empty() {
        "(none)".to_string()
    } else {
        memory_snippets
            .iter()
            .map(|m| format!("- {m}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let result_block = match tool_result {
        Some(result) if result.success => format!("Tool result:\n{}", result.output),
        Some(result) => format!(
            "Tool failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ),
        None => "No tool was executed.".to_string(),
    };
    format!(
        "User message:\n{user_message}\n\n{result_block}\n\n\
         Relevant memories:\n{memory_block}\n\n\
         Write a concise helpful answer for the user."
    )
}

/// Parse a JSON object out of a model reply, tolerating markdown fences.
pub(crate) fn parse_json_object(raw: &str) -> Result<serde_json::Value, ProviderError> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();

    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| ProviderError::Decode(format!("expected JSON object: {e}")))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ProviderError::Decode("reply is not a JSON object".into()))
    }
}

/// Fold a parsed score object into `ToolScores`, keeping one entry per
/// known tool and dropping anything non-numeric to zero.
pub(crate) fn scores_from_value(
    value: &serde_json::Value,
    tools: &[ToolDescriptor],
) -> ToolScores {
    tools
        .iter()
        .map(|t| {
            let score = value.get(&t.name).and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            (t.name.clone(), score)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, format!("{name} tool"), json!({"type": "object"}))
    }

    #[test]
    fn fenced_json_parses() {
        let value = parse_json_object("```json\n{\"shell\": 0.9}\n```").unwrap();
        assert_eq!(value["shell"], 0.9);
    }

    #[test]
    fn non_object_rejected() {
        assert!(parse_json_object("[1, 2]").is_err());
        assert!(parse_json_object("plain text").is_err());
    }

    #[test]
    fn scores_drop_unknown_and_non_numeric() {
        let tools = vec![descriptor("shell"), descriptor("file")];
        let value = json!({"shell": 0.8, "file": "high", "bogus": 1.0});
        let scores = scores_from_value(&value, &tools);
        assert_eq!(scores.get("shell"), Some(0.8));
        assert_eq!(scores.get("file"), Some(0.0));
        assert_eq!(scores.get("bogus"), None);
    }

    #[test]
    fn score_prompt_lists_every_tool() {
        let tools = vec![descriptor("shell"), descriptor("search")];
        let prompt = score_tools_prompt("list my files", &tools);
        assert!(prompt.contains("- shell: shell tool"));
        assert!(prompt.contains("- search: search tool"));
        assert!(prompt.contains("list my files"));
    }
}
