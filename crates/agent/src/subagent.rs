//! Confidence-gated second-opinion pass.
//!
//! When the turn acted with high confidence and the tool produced a
//! reviewable artifact, one extra provider call reviews the output. The
//! pass is strictly bounded: it never blocks past its budget and its
//! failure never alters the turn.

use picoagent_core::provider::{ChatMessage, ChatOptions, ProviderClient};
use picoagent_core::tool::ToolResult;
use picoagent_core::Decision;
use std::time::Duration;
use tracing::debug;

const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;
const DEFAULT_BUDGET_SECS: u64 = 5;
const MAX_NOTE_CHARS: usize = 900;
const MAX_OUTPUT_CHARS: usize = 2200;

/// Spawns a review call when the gate passes.
#[derive(Debug, Clone)]
pub struct SubagentCoordinator {
    min_confidence: f64,
    budget: Duration,
}

impl SubagentCoordinator {
    pub fn new() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            budget: Duration::from_secs(DEFAULT_BUDGET_SECS),
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// A result is reviewable when its data says so.
    fn is_reviewable(result: &ToolResult) -> bool {
        result.success
            && (result.data.contains_key("artifact")
                || result
                    .data
                    .get("reviewable")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false))
    }

    /// Run the review if the gate passes; `None` on gate miss, timeout, or
    /// provider error.
    pub async fn maybe_review(
        &self,
        provider: &dyn ProviderClient,
        user_message: &str,
        decision: &Decision,
        result: &ToolResult,
    ) -> Option<String> {
        let Decision::Act { tool, confidence, .. } = decision else {
            return None;
        };
        if *confidence < self.min_confidence || !Self::is_reviewable(result) {
            return None;
        }

        let clipped_output: String = result.output.chars().take(MAX_OUTPUT_CHARS).collect();
        let prompt = format!(
            "User request:\n{user_message}\n\n\
             Primary tool: {tool}\n\
             Tool output:\n{clipped_output}\n\n\
             Provide a short second-opinion review with:\n\
             1) one risk if any,\n\
             2) one follow-up action."
        );
        let messages = [
            ChatMessage::system("You are a cautious assistant. Keep output under 120 words."),
            ChatMessage::user(prompt),
        ];

        match tokio::time::timeout(
            self.budget,
            provider.chat(&messages, &ChatOptions::default()),
        )
        .await
        {
            Ok(Ok(note)) => {
                let clipped: String = note.trim().chars().take(MAX_NOTE_CHARS).collect();
                if clipped.is_empty() {
                    None
                } else {
                    debug!(tool, "Subagent review attached");
                    Some(clipped)
                }
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Subagent review failed");
                None
            }
            Err(_) => {
                debug!(budget_secs = self.budget.as_secs(), "Subagent review timed out");
                None
            }
        }
    }
}

impl Default for SubagentCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
