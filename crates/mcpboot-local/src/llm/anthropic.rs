//! Anthropic Messages API client.
//!
//! Grounded on `anthropic_async`'s client shape (from
//! `allisoneer-agentic_auxilary/crates/services/anthropic-async`) — a
//! reqwest-backed client with typed request/response structs and an
//! `x-api-key`/`anthropic-version` header pair — but scoped down to the one
//! non-streaming `messages.create` call the planner/compiler need.

use mcpboot_core::{Error, LlmClient, Result};
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            base_url: "https://api.anthropic.com".to_string(),
            api_key,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct MessageParam {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessagesCreateRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<MessageParam>,
}

#[derive(Debug, Deserialize)]
struct MessagesCreateResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        let req = MessagesCreateRequest {
            model: self.model.clone(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: Some(system.to_string()),
            messages: vec![MessageParam {
                role: "user",
                content: user.to_string(),
            }],
        };

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm {
                phase: "anthropic".to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Llm {
                phase: "anthropic".to_string(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: MessagesCreateResponse = resp.json().await.map_err(|e| Error::Llm {
            phase: "anthropic".to_string(),
            message: e.to_string(),
        })?;

        Ok(parsed
            .content
            .into_iter()
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""))
    }

    fn identity(&self) -> String {
        format!("anthropic:{}", self.model)
    }
}
