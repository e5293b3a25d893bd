//! LLM → validated `GenerationPlan`.
//!
//! The system prompt constrains the model to emit only JSON matching the
//! plan schema; the post-LLM pipeline extracts, parses, and validates it,
//! retrying at most once on the same prompts (no corrective feedback) per
//! the spec's deliberately simple retry protocol.

use mcpboot_core::{Error, FetchedContent, GenerationPlan, LlmClient, PlannedTool, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

const MAX_ATTEMPTS: usize = 2;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid identifier regex"));

static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence regex"));

static BRACE_SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("brace span regex"));

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>)\]]+"#).expect("url regex"));

const SYSTEM_PROMPT: &str = "You are a tool-planning engine for an MCP server generator. \
Given a user's natural-language request and any fetched reference documents, emit a JSON plan \
describing the set of MCP tools to build. Respond with ONLY a single JSON object matching this \
shape, no prose before or after:\n\
{\"tools\":[{\"name\":\"snake_case_identifier\",\"description\":\"...\",\"inputSchema\":{\"type\":\"object\",\"properties\":{}},\
\"endpointsUsed\":[\"https://...\"],\"implementationNotes\":\"...\",\"needsNetwork\":true}]}\n\
Rules: tool names match ^[a-z][a-z0-9_]*$ and are unique. description and implementationNotes \
are nonempty. inputSchema is a JSON Schema object. needsNetwork is a boolean. If needsNetwork is \
true, every URL referenced in endpointsUsed must be on an allowed domain listed below. Emit at \
least one tool.";

fn build_user_prompt(prompt: &str, documents: &[FetchedContent], whitelist_domains: &[String]) -> String {
    let mut out = String::new();
    out.push_str("USER REQUEST:\n");
    out.push_str(prompt);
    out.push_str("\n\nFETCHED DOCUMENTS:\n");
    if documents.is_empty() {
        out.push_str("(none)\n");
    } else {
        for doc in documents {
            out.push_str(&format!("--- {} ---\n{}\n", doc.url, doc.text));
        }
    }
    out.push_str("\nALLOWED DOMAINS:\n");
    if whitelist_domains.is_empty() {
        out.push_str("none — emit only pure-computation tools (needsNetwork: false).\n");
    } else {
        for d in whitelist_domains {
            out.push_str(&format!("- {d}\n"));
        }
    }
    out
}

/// Accept a fenced ```json ... ``` block, an unfenced `{ ... }` span, or the
/// raw text, in that preference order.
fn extract_json_blob(text: &str) -> String {
    if let Some(caps) = FENCED_JSON_RE.captures(text) {
        return caps[1].to_string();
    }
    if let Some(m) = BRACE_SPAN_RE.find(text) {
        return m.as_str().to_string();
    }
    text.to_string()
}

fn url_host(url: &str) -> Option<String> {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

fn structural_validate(plan: &GenerationPlan) -> Result<()> {
    if plan.tools.is_empty() {
        return Err(Error::PlanValidation("plan has no tools".to_string()));
    }
    let mut seen = HashSet::new();
    for t in &plan.tools {
        if t.name.is_empty() || !IDENTIFIER_RE.is_match(&t.name) {
            return Err(Error::PlanValidation(format!(
                "tool \"{}\" has an invalid name (must match ^[a-z][a-z0-9_]*$)",
                t.name
            )));
        }
        if !seen.insert(t.name.clone()) {
            return Err(Error::PlanValidation(format!(
                "tool name \"{}\" is not unique within the plan",
                t.name
            )));
        }
        if t.description.trim().is_empty() {
            return Err(Error::PlanValidation(format!(
                "tool \"{}\" has an empty description",
                t.name
            )));
        }
        if t.implementation_notes.trim().is_empty() {
            return Err(Error::PlanValidation(format!(
                "tool \"{}\" has empty implementationNotes",
                t.name
            )));
        }
        if !t.input_schema.is_object() {
            return Err(Error::PlanValidation(format!(
                "tool \"{}\" has a non-object inputSchema",
                t.name
            )));
        }
    }
    Ok(())
}

fn whitelist_validate(plan: &GenerationPlan, allowed: &[String]) -> Result<()> {
    for t in &plan.tools {
        if !t.needs_network {
            continue;
        }
        for endpoint in &t.endpoints_used {
            for m in URL_RE.find_iter(endpoint) {
                let Some(host) = url_host(m.as_str()) else {
                    continue;
                };
                let ok = allowed
                    .iter()
                    .any(|d| host == *d || host.ends_with(&format!(".{d}")));
                if !ok {
                    return Err(Error::PlanValidation(format!(
                        "tool \"{}\" references endpoint \"{}\" whose host \"{}\" is not in the whitelist",
                        t.name, endpoint, host
                    )));
                }
            }
        }
    }
    Ok(())
}

fn parse_and_validate(raw: &str, allowed: &[String]) -> Result<GenerationPlan> {
    let blob = extract_json_blob(raw);
    let plan: GenerationPlan = serde_json::from_str(&blob)
        .map_err(|e| Error::PlanValidation(format!("invalid JSON: {e}")))?;
    structural_validate(&plan)?;
    whitelist_validate(&plan, allowed)?;
    Ok(plan)
}

/// Run the planner against an LLM, retrying at most once on the same
/// prompts.
pub async fn plan(
    llm: &dyn LlmClient,
    prompt: &str,
    documents: &[FetchedContent],
    whitelist_domains: &[String],
) -> Result<GenerationPlan> {
    let user_prompt = build_user_prompt(prompt, documents, whitelist_domains);

    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        let raw = llm
            .generate(SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| Error::Llm {
                phase: "planning".to_string(),
                message: e.to_string(),
            })?;
        match parse_and_validate(&raw, whitelist_domains) {
            Ok(plan) => return Ok(plan),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "planner validation failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::PlanValidation("planner exhausted retries".to_string())))
}

/// Construct a plan directly for tests that want to bypass the LLM round
/// trip but still exercise validation.
pub fn validate_plan(tools: Vec<PlannedTool>, whitelist_domains: &[String]) -> Result<GenerationPlan> {
    let plan = GenerationPlan { tools };
    structural_validate(&plan)?;
    whitelist_validate(&plan, whitelist_domains)?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubLlm {
        responses: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl StubLlm {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(|s| s.to_string()).rev().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses.lock().unwrap().pop().unwrap_or_default())
        }
        fn identity(&self) -> String {
            "stub".to_string()
        }
    }

    fn calc_plan_json() -> &'static str {
        r#"```json
        {"tools":[
          {"name":"add_numbers","description":"adds two numbers","inputSchema":{"type":"object","properties":{"a":{"type":"number"},"b":{"type":"number"}}},"endpointsUsed":[],"implementationNotes":"return a+b","needsNetwork":false},
          {"name":"multiply_numbers","description":"multiplies two numbers","inputSchema":{"type":"object","properties":{"a":{"type":"number"},"b":{"type":"number"}}},"endpointsUsed":[],"implementationNotes":"return a*b","needsNetwork":false}
        ]}
        ```"#
    }

    #[tokio::test]
    async fn accepts_a_valid_fenced_plan_on_first_try() {
        let llm = StubLlm::new(vec![calc_plan_json()]);
        let plan = plan(&llm, "calculator", &[], &[]).await.unwrap();
        assert_eq!(plan.tools.len(), 2);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_once_then_fails_on_repeated_parse_errors() {
        let llm = StubLlm::new(vec!["not json", "still not json"]);
        let err = plan(&llm, "calculator", &[], &[]).await.unwrap_err();
        assert!(matches!(err, Error::PlanValidation(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn recovers_on_second_attempt() {
        let llm = StubLlm::new(vec!["garbage", calc_plan_json()]);
        let plan = plan(&llm, "calculator", &[], &[]).await.unwrap();
        assert_eq!(plan.tools.len(), 2);
    }

    #[test]
    fn rejects_duplicate_and_malformed_names() {
        let mk = |name: &str| PlannedTool {
            name: name.to_string(),
            description: "d".into(),
            input_schema: serde_json::json!({"type": "object"}),
            endpoints_used: vec![],
            implementation_notes: "n".into(),
            needs_network: false,
        };
        assert!(validate_plan(vec![mk("Bad-Name")], &[]).is_err());
        assert!(validate_plan(vec![mk("dup"), mk("dup")], &[]).is_err());
        assert!(validate_plan(vec![mk("ok_name")], &[]).is_ok());
    }

    #[test]
    fn rejects_network_tool_with_endpoint_outside_whitelist() {
        let tool = PlannedTool {
            name: "fetch_weather".to_string(),
            description: "d".into(),
            input_schema: serde_json::json!({"type": "object"}),
            endpoints_used: vec!["https://evil.com/api".to_string()],
            implementation_notes: "n".into(),
            needs_network: true,
        };
        let err = validate_plan(vec![tool], &["example.com".to_string()]).unwrap_err();
        assert!(matches!(err, Error::PlanValidation(_)));
    }
}
