//! `PlannedTool` → validated `CompiledTool`.
//!
//! One LLM round trip per tool, asking for the body of an
//! `async function(args, fetch) { ... }` handler. The response is put
//! through an extraction, forbidden-pattern, and syntax-check pipeline with
//! a single retry on the same prompts, mirroring the planner's protocol.

use mcpboot_core::{CompiledTool, Error, LlmClient, PlannedTool, Result};
use regex::Regex;
use std::sync::LazyLock;

const MAX_ATTEMPTS: usize = 2;

static FENCED_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:js|javascript)?\s*(.*?)\s*```").expect("fence regex"));

/// Constructs the `async function` are rejected outright: every handler
/// runs inside a single pre-built async function, so source that tries to
/// declare another one, reach for dynamic evaluation, or touch the module
/// system is always a sandbox escape attempt rather than a legitimate tool.
const FORBIDDEN_PATTERNS: &[&str] = &[
    "eval(",
    "Function(",
    "new Function",
    "import(",
    "require(",
    "process.",
    "globalThis",
    "__proto__",
    "constructor.constructor",
    "WebAssembly",
    "XMLHttpRequest",
];

fn system_prompt() -> String {
    "You are a code-generation engine producing the BODY of a single JavaScript async function \
for an MCP tool handler. The function signature is fixed and invisible to you: \
`async function handler(args, fetch) { <your code> }`. `args` is the parsed tool input object; \
`fetch` is a pre-bound capability with the standard `fetch(url, init)` signature returning a \
Response-like object (`status`, `ok`, `statusText`, `headers.get(name)`, `text()`, `json()`). \
You may use only: the function parameters, standard JS syntax and built-ins (Math, JSON, Array, \
Object, String, Number, Map, Set, Promise, RegExp, Date, parseInt, parseFloat, isNaN, isFinite, \
structuredClone, URL, URLSearchParams, Headers, TextEncoder, TextDecoder), and `fetch`. Do not declare another \
function named `handler`, do not use eval/Function/import/require, do not reference `process`, \
`globalThis`, or module systems. The function MUST return a plain object of this exact shape: \
`{ content: [ { type: \"text\", text: \"...\" } ] }`. Respond with ONLY the function body wrapped \
in a ```javascript fenced block, no other prose.".to_string()
}

fn build_user_prompt(tool: &PlannedTool) -> String {
    format!(
        "Tool name: {}\nDescription: {}\nInput schema: {}\nImplementation notes: {}\nNeeds network: {}\n",
        tool.name,
        tool.description,
        tool.input_schema,
        tool.implementation_notes,
        tool.needs_network,
    )
}

fn extract_code(raw: &str) -> String {
    if let Some(caps) = FENCED_CODE_RE.captures(raw) {
        return caps[1].trim().to_string();
    }
    raw.trim().to_string()
}

fn check_forbidden_patterns(source: &str) -> Result<()> {
    for pattern in FORBIDDEN_PATTERNS {
        if source.contains(pattern) {
            return Err(Error::CodeValidation(format!(
                "handler source contains a forbidden pattern: \"{pattern}\""
            )));
        }
    }
    if source.trim().is_empty() {
        return Err(Error::CodeValidation("handler source is empty".to_string()));
    }
    Ok(())
}

/// Best-effort syntax check: wrap the body in the real handler signature
/// and ask QuickJS to compile it without executing it. Any parse error from
/// the engine is treated as invalid source.
fn check_syntax(source: &str) -> Result<()> {
    let wrapped = wrap_handler_source(source);
    let runtime = rquickjs::Runtime::new()
        .map_err(|e| Error::CodeValidation(format!("sandbox runtime init failed: {e}")))?;
    let context = rquickjs::Context::full(&runtime)
        .map_err(|e| Error::CodeValidation(format!("sandbox context init failed: {e}")))?;
    context.with(|ctx| -> Result<()> {
        ctx.eval::<rquickjs::Value, _>(wrapped)
            .map_err(|e| Error::CodeValidation(format!("handler source failed to parse: {e}")))?;
        Ok(())
    })
}

/// Wraps a generated function body in the fixed handler signature the
/// sandbox invokes at call time.
pub fn wrap_handler_source(body: &str) -> String {
    format!("(async function handler(args, fetch) {{\n{body}\n}})")
}

/// `needsNetwork` is a data-model invariant: a tool that claims it needs
/// the network must actually call the capability, and one that claims it
/// doesn't must not reach for it behind the plan's back.
fn check_network_consistency(source: &str, needs_network: bool) -> Result<()> {
    let calls_fetch = source.contains("fetch(");
    if needs_network && !calls_fetch {
        return Err(Error::CodeValidation(
            "tool is marked needsNetwork but its handler never calls fetch(...)".to_string(),
        ));
    }
    if !needs_network && calls_fetch {
        return Err(Error::CodeValidation(
            "tool is marked !needsNetwork but its handler calls fetch(...)".to_string(),
        ));
    }
    Ok(())
}

fn validate(raw: &str, needs_network: bool) -> Result<String> {
    let code = extract_code(raw);
    check_forbidden_patterns(&code)?;
    check_syntax(&code)?;
    check_network_consistency(&code, needs_network)?;
    Ok(code)
}

/// Compile a single planned tool into a `CompiledTool`, retrying once on
/// the same prompts if validation fails.
pub async fn compile_tool(llm: &dyn LlmClient, tool: &PlannedTool) -> Result<CompiledTool> {
    let system = system_prompt();
    let user = build_user_prompt(tool);

    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        let raw = llm.generate(&system, &user).await.map_err(|e| Error::Llm {
            phase: "compiling".to_string(),
            message: e.to_string(),
        })?;
        match validate(&raw, tool.needs_network) {
            Ok(handler_source) => {
                return Ok(CompiledTool {
                    plan: tool.clone(),
                    handler_source,
                })
            }
            Err(e) => {
                tracing::warn!(tool = %tool.name, attempt, error = %e, "compiler validation failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        Error::CodeValidation(format!("compiler exhausted retries for tool \"{}\"", tool.name))
    }))
}

/// Compile every tool in a plan, stopping at the first failure.
pub async fn compile_plan(llm: &dyn LlmClient, tools: &[PlannedTool]) -> Result<Vec<CompiledTool>> {
    let mut compiled = Vec::with_capacity(tools.len());
    for tool in tools {
        compiled.push(compile_tool(llm, tool).await?);
    }
    Ok(compiled)
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

    fn sample_tool() -> PlannedTool {
        PlannedTool {
            name: "add_numbers".to_string(),
            description: "adds two numbers".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
            endpoints_used: vec![],
            implementation_notes: "return a+b".to_string(),
            needs_network: false,
        }
    }

    #[tokio::test]
    async fn compiles_a_valid_fenced_handler() {
        let llm = StubLlm::new(vec![
            "```javascript\nreturn { content: [{ type: \"text\", text: String(args.a + args.b) }] };\n```",
        ]);
        let compiled = compile_tool(&llm, &sample_tool()).await.unwrap();
        assert!(compiled.handler_source.contains("args.a + args.b"));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_and_retries_on_forbidden_pattern() {
        let llm = StubLlm::new(vec![
            "```javascript\nreturn eval(args.expr);\n```",
            "```javascript\nreturn { content: [{ type: \"text\", text: \"ok\" }] };\n```",
        ]);
        let compiled = compile_tool(&llm, &sample_tool()).await.unwrap();
        assert!(!compiled.handler_source.contains("eval("));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_two_invalid_attempts() {
        let llm = StubLlm::new(vec![
            "```javascript\nthis is not valid js {{{\n```",
            "```javascript\nstill not valid ><\n```",
        ]);
        let err = compile_tool(&llm, &sample_tool()).await.unwrap_err();
        assert!(matches!(err, Error::CodeValidation(_)));
    }

    #[test]
    fn wrap_handler_source_produces_parseable_wrapper() {
        let wrapped = wrap_handler_source("return { content: [] };");
        assert!(wrapped.starts_with("(async function handler(args, fetch)"));
    }

    #[tokio::test]
    async fn rejects_and_retries_when_handler_calls_fetch_but_plan_says_no_network() {
        let mut tool = sample_tool();
        tool.needs_network = false;
        let llm = StubLlm::new(vec![
            "```javascript\nconst r = await fetch(\"https://example.com\"); return { content: [{ type: \"text\", text: \"x\" }] };\n```",
            "```javascript\nreturn { content: [{ type: \"text\", text: \"ok\" }] };\n```",
        ]);
        let compiled = compile_tool(&llm, &tool).await.unwrap();
        assert!(!compiled.handler_source.contains("fetch("));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejects_when_plan_says_network_but_handler_never_calls_fetch() {
        let mut tool = sample_tool();
        tool.needs_network = true;
        let llm = StubLlm::new(vec![
            "```javascript\nreturn { content: [{ type: \"text\", text: \"no network here\" }] };\n```",
            "```javascript\nreturn { content: [{ type: \"text\", text: \"still no network\" }] };\n```",
        ]);
        let err = compile_tool(&llm, &tool).await.unwrap_err();
        assert!(matches!(err, Error::CodeValidation(_)));
    }
}
