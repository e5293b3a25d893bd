//! OpenAI-compatible chat-completions client.
//!
//! Direct generalization of the teacher's `webpipe-local/src/openai_compat.rs`:
//! same request/response shape (`/v1/chat/completions`, `choices[0].message.content`),
//! trimmed down to the single non-streaming call the planner/compiler need.

use mcpboot_core::{Error, LlmClient, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(client: reqwest::Client, api_key: Option<String>, model: String) -> Self {
        Self {
            client,
            base_url: "https://api.openai.com".to_string(),
            api_key,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        let req = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
        };

        let mut rb = self
            .client
            .post(self.endpoint())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = rb.json(&req).send().await.map_err(|e| Error::Llm {
            phase: "openai".to_string(),
            message: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Llm {
                phase: "openai".to_string(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: ChatCompletionsResponse = resp.json().await.map_err(|e| Error::Llm {
            phase: "openai".to_string(),
            message: e.to_string(),
        })?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    fn identity(&self) -> String {
        format!("openai:{}", self.model)
    }
}
