//! Anthropic messages-API client.
//!
//! Chat-only: Anthropic exposes no embeddings endpoint, so `embed` reports
//! `NotSupported` and the fallback wrapper routes embeddings to the
//! heuristic client.

use async_trait::async_trait;
use picoagent_core::error::ProviderError;
use picoagent_core::provider::{ChatMessage, ChatOptions, ProviderClient, ToolScores};
use picoagent_core::tool::{ToolDescriptor, ToolResult};
use serde::{Deserialize, Serialize};

use crate::prompts;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const HTTP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_TOKENS: u32 = 800;

/// Client for the Anthropic `/messages` endpoint.
pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    chat_model: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        chat_model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            chat_model: chat_model.into(),
            client,
        }
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
}

#[derive(Deserialize)]
struct ApiContentBlock {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::NotSupported(
            "anthropic exposes no embeddings endpoint".into(),
        ))
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        // System messages move to the dedicated field; tool output rides
        // as user content.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == picoagent_core::Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<ApiMessage> = messages
            .iter()
            .filter(|m| m.role != picoagent_core::Role::System)
            .map(|m| ApiMessage {
                role: match m.role {
                    picoagent_core::Role::Assistant => "assistant",
                    _ => "user",
                },
                content: m.content.clone(),
            })
            .collect();

        let request = ApiRequest {
            model: &self.chat_model,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: if system.is_empty() { None } else { Some(system.join("\n\n")) },
            messages: turns,
            stop_sequences: options.stop.clone(),
        };

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("POST {url}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(format!("read body: {e}")))?;
        if !status.is_success() {
            return Err(ProviderError::Transport(format!(
                "HTTP {status} from {url}: {}",
                text.chars().take(300).collect::<String>()
            )));
        }

        let parsed: ApiResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Decode(format!("{url}: {e}")))?;
        parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text.trim().to_string())
            .ok_or_else(|| ProviderError::Decode("anthropic response missing content".into()))
    }

    async fn score_tools(
        &self,
        system_prompt: &str,
        user_message: &str,
        tools: &[ToolDescriptor],
    ) -> Result<ToolScores, ProviderError> {
        if tools.is_empty() {
            return Ok(ToolScores::new());
        }
        let routing = if system_prompt.is_empty() {
            prompts::ROUTING_SYSTEM_PROMPT.to_string()
        } else {
            format!("{system_prompt}\n\n{}", prompts::ROUTING_SYSTEM_PROMPT)
        };
        let raw = self
            .chat(
                &[
                    ChatMessage::system(routing),
                    ChatMessage::user(prompts::score_tools_prompt(user_message, tools)),
                ],
                &ChatOptions::default(),
            )
            .await?;
        let parsed = prompts::parse_json_object(&raw)?;
        Ok(prompts::scores_from_value(&parsed, tools))
    }

    async fn plan_tool_args(
        &self,
        user_message: &str,
        tool: &ToolDescriptor,
        context: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let raw = self
            .chat(
                &[
                    ChatMessage::system(prompts::PLANNING_SYSTEM_PROMPT),
                    ChatMessage::user(prompts::plan_args_prompt(user_message, tool, context)),
                ],
                &ChatOptions::default(),
            )
            .await?;
        prompts::parse_json_object(&raw)
    }

    async fn synthesize_response(
        &self,
        user_message: &str,
        tool_result: Option<&ToolResult>,
        memory_snippets: &[String],
    ) -> Result<String, ProviderError> {
        self.chat(
            &[
                ChatMessage::system(prompts::SYNTHESIS_SYSTEM_PROMPT),
                ChatMessage::user(prompts::synthesize_prompt(
                    user_message,
                    tool_result,
                    memory_snippets,
                )),
            ],
            &ChatOptions { temperature: 0.4, ..ChatOptions::default() },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_are_not_supported() {
        let client = AnthropicClient::new("https://api.anthropic.com/v1", "key", "model");
        let err = client.embed(&["text".into()]).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotSupported(_)));
    }

    #[test]
    fn base_url_is_normalized() {
        let client = AnthropicClient::new("https://api.anthropic.com/v1/", "key", "model");
        assert_eq!(client.base_url, "https://api.anthropic.com/v1");
    }
}
