//! LLM transport clients implementing `mcpboot_core::LlmClient`.
//!
//! Both clients are plain `generate(system, user) -> text` wrappers, per
//! the spec's deliberately narrow LLM contract — no retries, no streaming,
//! no model-specific logic beyond the request/response shape.

mod anthropic;
mod openai_compat;

pub use anthropic::AnthropicClient;
pub use openai_compat::OpenAiCompatClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
}

impl Provider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    pub fn env_key_var(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-5",
            Self::OpenAi => "gpt-4o-mini",
        }
    }
}
