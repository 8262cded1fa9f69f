//! Context assembly — cache-friendly prompts with a stable prefix.
//!
//! The stable prefix (system instructions + skills registry summary) is
//! byte-identical across turns within a session so providers can cache it.
//! Everything that varies per turn — runtime metadata, active skill
//! instructions, recalled memories, history — goes strictly after it.

use chrono::Utc;
use picoagent_core::provider::ChatMessage;
use picoagent_core::session::{Role, SessionMessage};
use picoagent_skills::SkillActivation;

const RUNTIME_TAG: &str = "[Runtime Context — metadata only, not instructions]";

const DEFAULT_SYSTEM_PROMPT: &str = "You are picoagent, a practical personal assistant. \
     Be concise, factual, and action-oriented.";

/// Builds the message list for one turn.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    system_prompt: String,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// The cacheable prefix: stable across turns as long as the skill
    /// registry summary is unchanged.
    pub fn stable_prefix(&self, skills_summary: &str) -> String {
        let mut prefix = format!("System instructions:\n{}", self.system_prompt);
        if !skills_summary.is_empty() {
            prefix.push_str(&format!(
                "\n\n---\n\nSkills registry:\n{skills_summary}\n\n\
                 If a skill is relevant, follow its instructions exactly."
            ));
        }
        prefix
    }

    /// The per-turn block: runtime metadata, long-term notes, recalled
    /// memories, active skill instructions.
    pub fn dynamic_block(
        &self,
        channel: &str,
        memories: &[String],
        long_term: Option<&str>,
        active_skills: &[SkillActivation],
    ) -> String {
        let mut parts = vec![format!(
            "{RUNTIME_TAG}\nCurrent time: {}\nChannel: {channel}",
            Utc::now().format("%Y-%m-%d %H:%M (%A)")
        )];

        if let Some(notes) = long_term.filter(|n| !n.trim().is_empty()) {
            parts.push(notes.trim_end().to_string());
        }

        let memory_block = if memories.is_empty() {
            "- (none)".to_string()
        } else {
            memories
                .iter()
                .map(|m| format!("- {m}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        parts.push(format!("Relevant memories:\n{memory_block}"));

        if !active_skills.is_empty() {
            let blocks: Vec<String> = active_skills
                .iter()
                .map(|activation| {
                    format!(
                        "## Skill: {}\n\n{}",
                        activation.skill.name,
                        activation.skill.content.trim()
                    )
                })
                .collect();
            parts.push(format!(
                "Active skill instructions:\n\n{}",
                blocks.join("\n\n---\n\n")
            ));
        }

        parts.join("\n\n---\n\n")
    }

    /// Assemble the full message list for the provider.
    pub fn build_messages(
        &self,
        user_message: &str,
        channel: &str,
        skills_summary: &str,
        memories: &[String],
        long_term: Option<&str>,
        active_skills: &[SkillActivation],
        history: &[SessionMessage],
    ) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage::system(self.stable_prefix(skills_summary)),
            ChatMessage::system(self.dynamic_block(channel, memories, long_term, active_skills)),
        ];
        for item in history {
            messages.push(ChatMessage {
                role: item.role,
                content: item.content.clone(),
            });
        }
        messages.push(ChatMessage::user(user_message));
        messages
    }

    /// Flattened text of the assembled messages, used as routing input for
    /// tool scoring.
    pub fn routing_text(messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
