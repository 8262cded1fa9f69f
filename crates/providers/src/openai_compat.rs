//! OpenAI-compatible provider client.
//!
//! Works with OpenAI, OpenRouter, DeepSeek, Groq, vLLM, and any endpoint
//! exposing `/chat/completions` and `/embeddings`. This handles the vast
//! majority of vendors, so the other clients only cover what differs.

use async_trait::async_trait;
use picoagent_core::error::ProviderError;
use picoagent_core::provider::{ChatMessage, ChatOptions, ProviderClient, ToolScores};
use picoagent_core::tool::{ToolDescriptor, ToolResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::prompts;

const HTTP_TIMEOUT_SECS: u64 = 60;

/// Client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        chat_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            chat_model: chat_model.into(),
            embedding_model: embedding_model.into(),
            client,
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("User-Agent", "picoagent/0.2")
            .json(body)
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
        serde_json::from_str(&text)
            .map_err(|e| ProviderError::Decode(format!("{url}: {e}")))
    }
}

// ── Wire types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiChatResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct ApiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct ApiEmbeddingResponse {
    data: Vec<ApiEmbeddingDatum>,
}

#[derive(Deserialize)]
struct ApiEmbeddingDatum {
    embedding: Vec<f32>,
}

fn role_tag(message: &ChatMessage) -> &'static str {
    match message.role {
        picoagent_core::Role::System => "system",
        picoagent_core::Role::User => "user",
        picoagent_core::Role::Assistant => "assistant",
        picoagent_core::Role::Tool => "user",
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let response: ApiEmbeddingResponse = self
            .post(
                "/embeddings",
                &ApiEmbeddingRequest { model: &self.embedding_model, input: texts },
            )
            .await?;
        if response.data.len() != texts.len() {
            return Err(ProviderError::Decode(format!(
                "embedding count mismatch: asked {}, got {}",
                texts.len(),
                response.data.len()
            )));
        }
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        let request = ApiChatRequest {
            model: &self.chat_model,
            messages: messages
                .iter()
                .map(|m| ApiMessage { role: role_tag(m), content: &m.content })
                .collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: options.stop.clone(),
        };
        let response: ApiChatResponse = self.post("/chat/completions", &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                ProviderError::Decode("chat response missing choices[0].message.content".into())
            })
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
        let scores = prompts::scores_from_value(&parsed, tools);
        debug!(provider = %self.name, count = scores.len(), "Tools scored");
        Ok(scores)
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

    async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        matches!(
            self.client
                .get(&url)
                .bearer_auth(&self.api_key)
                .send()
                .await,
            Ok(response) if response.status().is_success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = OpenAiCompatClient::new(
            "openai",
            "https://api.openai.com/v1/",
            "key",
            "gpt-4o-mini",
            "text-embedding-3-small",
        );
        assert_eq!(client.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn tool_role_maps_to_user() {
        let message = ChatMessage {
            role: picoagent_core::Role::Tool,
            content: "result".into(),
        };
        assert_eq!(role_tag(&message), "user");
    }
}
