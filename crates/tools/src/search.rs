//! Web search tool — DuckDuckGo instant answers.
//!
//! No API key needed. Results are cacheable: identical queries within the
//! registry's TTL are served from the result cache without a request.

use async_trait::async_trait;
use picoagent_core::error::ToolError;
use picoagent_core::tool::{Tool, ToolContext, ToolDescriptor, ToolResult};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const ENDPOINT: &str = "https://api.duckduckgo.com/";
const MAX_RELATED: usize = 5;
const HTTP_TIMEOUT_SECS: u64 = 15;

/// Instant-answer search client.
pub struct SearchTool {
    client: reqwest::Client,
}

impl SearchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for SearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct InstantAnswer {
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
}

#[async_trait]
impl Tool for SearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "search",
            "Search the web and return a short abstract plus related results.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "minLength": 1 }
                },
                "required": ["query"]
            }),
        )
        .cacheable(true)
    }

    async fn run(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let query = args["query"].as_str().unwrap_or("").trim();
        if query.is_empty() {
            return Ok(ToolResult::failure("missing query"));
        }

        debug!(query, "Web search");
        let response = self
            .client
            .get(ENDPOINT)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool: "search".into(),
                reason: format!("request: {e}"),
            })?;

        let answer: InstantAnswer =
            response.json().await.map_err(|e| ToolError::ExecutionFailed {
                tool: "search".into(),
                reason: format!("decode: {e}"),
            })?;

        let mut lines = Vec::new();
        if !answer.abstract_text.is_empty() {
            lines.push(answer.abstract_text.clone());
            if !answer.abstract_url.is_empty() {
                lines.push(format!("Source: {}", answer.abstract_url));
            }
        }
        let related: Vec<&RelatedTopic> = answer
            .related_topics
            .iter()
            .filter(|t| !t.text.is_empty())
            .take(MAX_RELATED)
            .collect();
        if !related.is_empty() {
            lines.push("Related:".into());
            for topic in &related {
                lines.push(format!("- {} ({})", topic.text, topic.first_url));
            }
        }
        if lines.is_empty() {
            lines.push(format!("No instant answer for '{query}'."));
        }

        let mut data = serde_json::Map::new();
        data.insert("result_count".into(), json!(related.len()));
        Ok(ToolResult::ok_with_data(lines.join("\n"), data))
    }
}
