//! Fallback wrapping — degrade to the offline heuristic on provider error.
//!
//! Every call first goes to the primary; a failure routes that call (and
//! only that call) to the heuristic. A provider error is therefore never
//! fatal to a turn, and the fallback is never used silently after a
//! success.

use async_trait::async_trait;
use picoagent_core::error::ProviderError;
use picoagent_core::provider::{ChatMessage, ChatOptions, ProviderClient, ToolScores};
use picoagent_core::tool::{ToolDescriptor, ToolResult};
use std::sync::Arc;
use tracing::warn;

use crate::heuristic::LocalHeuristicClient;

/// A provider that falls back to `LocalHeuristicClient` per failed call.
pub struct FallbackClient {
    primary: Arc<dyn ProviderClient>,
    heuristic: LocalHeuristicClient,
    name: String,
}

impl FallbackClient {
    pub fn new(primary: Arc<dyn ProviderClient>) -> Self {
        let name = format!("{}+heuristic", primary.name());
        Self {
            primary,
            heuristic: LocalHeuristicClient::new(),
            name,
        }
    }
}

#[async_trait]
impl ProviderClient for FallbackClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        match self.primary.embed(texts).await {
            Ok(vectors) => Ok(vectors),
            Err(e) => {
                warn!(provider = self.primary.name(), error = %e, "embed failed, using heuristic");
                self.heuristic.embed(texts).await
            }
        }
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        match self.primary.chat(messages, options).await {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(provider = self.primary.name(), error = %e, "chat failed, using heuristic");
                self.heuristic.chat(messages, options).await
            }
        }
    }

    async fn score_tools(
        &self,
        system_prompt: &str,
        user_message: &str,
        tools: &[ToolDescriptor],
    ) -> Result<ToolScores, ProviderError> {
        match self.primary.score_tools(system_prompt, user_message, tools).await {
            // A provider replying all-zeros carries no routing signal;
            // the keyword rules do better than a guaranteed Clarify.
            Ok(scores) if scores.total() > 0.0 => Ok(scores),
            Ok(_) => {
                warn!(provider = self.primary.name(), "all-zero scores, using heuristic");
                self.heuristic.score_tools(system_prompt, user_message, tools).await
            }
            Err(e) => {
                warn!(provider = self.primary.name(), error = %e, "scoring failed, using heuristic");
                self.heuristic.score_tools(system_prompt, user_message, tools).await
            }
        }
    }

    async fn plan_tool_args(
        &self,
        user_message: &str,
        tool: &ToolDescriptor,
        context: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        match self.primary.plan_tool_args(user_message, tool, context).await {
            Ok(args) => Ok(args),
            Err(e) => {
                warn!(provider = self.primary.name(), error = %e, "planning failed, using heuristic");
                self.heuristic.plan_tool_args(user_message, tool, context).await
            }
        }
    }

    async fn synthesize_response(
        &self,
        user_message: &str,
        tool_result: Option<&ToolResult>,
        memory_snippets: &[String],
    ) -> Result<String, ProviderError> {
        match self
            .primary
            .synthesize_response(user_message, tool_result, memory_snippets)
            .await
        {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(provider = self.primary.name(), error = %e, "synthesis failed, using heuristic");
                self.heuristic
                    .synthesize_response(user_message, tool_result, memory_snippets)
                    .await
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.primary.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every call, counting them.
    struct FailingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderClient for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transport("connection refused".into()))
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transport("connection refused".into()))
        }

        async fn score_tools(
            &self,
            _system_prompt: &str,
            _user_message: &str,
            _tools: &[ToolDescriptor],
        ) -> Result<ToolScores, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transport("connection refused".into()))
        }

        async fn plan_tool_args(
            &self,
            _user_message: &str,
            _tool: &ToolDescriptor,
            _context: &str,
        ) -> Result<serde_json::Value, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transport("connection refused".into()))
        }

        async fn synthesize_response(
            &self,
            _user_message: &str,
            _tool_result: Option<&ToolResult>,
            _memory_snippets: &[String],
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transport("connection refused".into()))
        }
    }

    /// Succeeds every call.
    struct WorkingProvider;

    #[async_trait]
    impl ProviderClient for WorkingProvider {
        fn name(&self) -> &str {
            "working"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| vec![1.0f32]).collect())
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<String, ProviderError> {
            Ok("from primary".into())
        }

        async fn score_tools(
            &self,
            _system_prompt: &str,
            _user_message: &str,
            tools: &[ToolDescriptor],
        ) -> Result<ToolScores, ProviderError> {
            Ok(tools.iter().map(|t| (t.name.clone(), 1.0)).collect())
        }

        async fn plan_tool_args(
            &self,
            _user_message: &str,
            _tool: &ToolDescriptor,
            _context: &str,
        ) -> Result<serde_json::Value, ProviderError> {
            Ok(json!({"from": "primary"}))
        }

        async fn synthesize_response(
            &self,
            _user_message: &str,
            _tool_result: Option<&ToolResult>,
            _memory_snippets: &[String],
        ) -> Result<String, ProviderError> {
            Ok("synthesized by primary".into())
        }
    }

    fn tool() -> ToolDescriptor {
        ToolDescriptor::new("shell", "run commands", json!({"type": "object"}))
    }

    #[tokio::test]
    async fn primary_success_bypasses_heuristic() {
        let fallback = FallbackClient::new(Arc::new(WorkingProvider));
        assert_eq!(
            fallback.chat(&[ChatMessage::user("hi")], &ChatOptions::default()).await.unwrap(),
            "from primary"
        );
        let args = fallback.plan_tool_args("hi", &tool(), "").await.unwrap();
        assert_eq!(args["from"], "primary");
    }

    #[tokio::test]
    async fn failure_routes_to_heuristic() {
        let primary = Arc::new(FailingProvider { calls: AtomicUsize::new(0) });
        let fallback = FallbackClient::new(primary.clone());

        let scores = fallback
            .score_tools("", "run ls in the terminal", &[tool()])
            .await
            .unwrap();
        assert!(scores.get("shell").unwrap() > 0.0);

        let vectors = fallback.embed(&["hello".into()]).await.unwrap();
        assert_eq!(vectors[0].len(), crate::heuristic::HEURISTIC_EMBEDDING_DIM);

        // The primary was attempted each time, never skipped
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_zero_scores_trigger_heuristic() {
        struct ZeroScores;

        #[async_trait]
        impl ProviderClient for ZeroScores {
            fn name(&self) -> &str {
                "zeros"
            }
            async fn embed(&self, _t: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
                Err(ProviderError::NotSupported("n/a".into()))
            }
            async fn chat(
                &self,
                _m: &[ChatMessage],
                _o: &ChatOptions,
            ) -> Result<String, ProviderError> {
                Ok(String::new())
            }
            async fn score_tools(
                &self,
                _s: &str,
                _u: &str,
                tools: &[ToolDescriptor],
            ) -> Result<ToolScores, ProviderError> {
                Ok(tools.iter().map(|t| (t.name.clone(), 0.0)).collect())
            }
            async fn plan_tool_args(
                &self,
                _u: &str,
                _t: &ToolDescriptor,
                _c: &str,
            ) -> Result<serde_json::Value, ProviderError> {
                Ok(json!({}))
            }
            async fn synthesize_response(
                &self,
                _u: &str,
                _r: Option<&ToolResult>,
                _m: &[String],
            ) -> Result<String, ProviderError> {
                Ok(String::new())
            }
        }

        let fallback = FallbackClient::new(Arc::new(ZeroScores));
        let scores = fallback
            .score_tools("", "run ls please", &[tool()])
            .await
            .unwrap();
        assert!(scores.total() > 0.0, "heuristic must supply signal");
    }
}
