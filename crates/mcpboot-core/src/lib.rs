//! Backend-agnostic types and traits for mcpboot.
//!
//! This crate has no IO. It defines the data model shared by the fetcher,
//! whitelist, planner, compiler, sandbox, executor, and cache, plus the two
//! trait seams (`LlmClient`, `GatedFetch`) that let the rest of the
//! workspace swap in concrete backends without this crate knowing about
//! `reqwest` or any particular LLM provider.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Errors from any mcpboot component. Variants line up with the error kinds
/// in the error-handling design: startup-fatal kinds (`Config`, `Llm`,
/// `PlanValidation`, `CodeValidation`) abort the orchestrator; per-request
/// kinds (`Sandbox`, `WhitelistViolation`) are absorbed into a `ToolResult`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("llm failed ({phase}): {message}")]
    Llm { phase: String, message: String },

    #[error("plan invalid: {0}")]
    PlanValidation(String),

    #[error("code invalid: {0}")]
    CodeValidation(String),

    #[error("{0}")]
    Sandbox(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("{0}")]
    WhitelistViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The text a URL turned into. Produced by the fetcher, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedContent {
    pub url: String,
    pub text: String,
    pub content_type: String,
    pub discovered_urls: Vec<String>,
}

/// The LLM's intent for one tool, before it has handler source attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub endpoints_used: Vec<String>,
    pub implementation_notes: String,
    pub needs_network: bool,
}

/// A validated, immutable plan produced once per cache miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationPlan {
    pub tools: Vec<PlannedTool>,
}

/// A `PlannedTool` enriched with the handler source text the compiler
/// produced for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledTool {
    #[serde(flatten)]
    pub plan: PlannedTool,
    pub handler_source: String,
}

/// The compiled tool table the executor owns for the life of the process.
///
/// `IndexMap` (not `BTreeMap`) because `listTools()` must preserve
/// insertion order, which a name-sorted map would silently violate.
#[derive(Debug, Clone, Default)]
pub struct CompiledTools {
    pub tools: IndexMap<String, CompiledTool>,
    pub whitelist_domains: Vec<String>,
}

impl CompiledTools {
    pub fn from_plan_and_tools(tools: Vec<CompiledTool>, whitelist_domains: Vec<String>) -> Self {
        let mut map = IndexMap::with_capacity(tools.len());
        for t in tools {
            map.insert(t.plan.name.clone(), t);
        }
        Self {
            tools: map,
            whitelist_domains,
        }
    }

    pub fn to_vec(&self) -> Vec<CompiledTool> {
        self.tools.values().cloned().collect()
    }
}

/// One persisted cache entry: the full output of a cache-miss startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub prompt_fingerprint: String,
    pub content_fingerprint: String,
    pub plan: GenerationPlan,
    pub compiled_tools: Vec<CompiledTool>,
    pub whitelist_domains: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// One block of MCP tool-result content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// The MCP-shaped return value every handler (and the executor) produces.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: Some(true),
        }
    }
}

/// `generate(system, user) -> text` — the entire surface the planner and
/// compiler need from an LLM provider. Implementations live in
/// `mcpboot-local::llm`; this trait is the seam that lets the planner and
/// compiler be provider-agnostic and unit-testable against a stub.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String>;

    /// Human-readable identifier used in `LlmError` messages and the
    /// `_mcp_metadata` diagnostic payload (e.g. "anthropic:claude-...").
    fn identity(&self) -> String;
}

/// A capability-gated outbound HTTP fetch, as exposed to sandboxed handler
/// code. Implementations check a whitelist before delegating to a real
/// HTTP client; see `mcpboot-local::whitelist::create_gated_fetch`.
#[async_trait::async_trait]
pub trait GatedFetch: Send + Sync {
    async fn fetch(&self, url: &str, init: GatedFetchInit) -> Result<GatedFetchResponse>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatedFetchInit {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatedFetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: std::collections::BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl GatedFetchResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_helpers_set_is_error_correctly() {
        let ok = ToolResult::text("42");
        assert_eq!(ok.is_error, None);
        assert_eq!(ok.content[0].text, "42");

        let err = ToolResult::error("boom");
        assert_eq!(err.is_error, Some(true));
    }

    #[test]
    fn compiled_tools_preserves_insertion_order() {
        let mk = |name: &str| CompiledTool {
            plan: PlannedTool {
                name: name.to_string(),
                description: "d".into(),
                input_schema: serde_json::json!({"type": "object"}),
                endpoints_used: vec![],
                implementation_notes: "n".into(),
                needs_network: false,
            },
            handler_source: "return {content:[]};".into(),
        };
        let tools = CompiledTools::from_plan_and_tools(
            vec![mk("zeta"), mk("alpha"), mk("mid")],
            vec![],
        );
        let names: Vec<&str> = tools.tools.keys().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }
}
