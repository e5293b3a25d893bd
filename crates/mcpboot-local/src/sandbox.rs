//! QuickJS-backed execution sandbox for compiled tool handlers.
//!
//! Each handler runs as `(async function handler(args, fetch) { ... })`
//! inside a fresh `rquickjs` context whose global object has been pruned
//! down to a curated allow list. The only side-effecting capability exposed
//! to handler code is the gated `fetch` binding; everything else closed by
//! omission. Grounded on the rquickjs usage in
//! `other_examples/manifests/{lpajunen-aiwebengine,swissarmyhammer-swissarmyhammer,MikkoParkkola-nab}`
//! for the async-engine shape, generalized to this crate's capability model.

use mcpboot_core::{Error, GatedFetch, Result, ToolContent, ToolResult};
use rquickjs::{AsyncContext, AsyncRuntime, CatchResultExt};
use std::sync::Arc;
use std::time::Duration;

/// Wall-clock budget for a single handler invocation, independent of how
/// much of that time is spent waiting on `fetch`.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything reachable from the handler's global scope besides the two
/// function parameters. `fetch` is installed separately since it carries
/// Rust-side state; `URL`/`URLSearchParams`/`Headers`/`TextEncoder`/
/// `TextDecoder` are JS classes installed by `SANDBOX_PRELUDE` (they never
/// become own properties of `globalThis`, so pruning can't touch them
/// regardless, but they're listed here for the record); `structuredClone`
/// and `parseInt`/`parseFloat`/`isNaN`/`isFinite` ARE plain global function
/// properties and must be listed to survive the pruning pass below.
const ALLOWED_GLOBALS: &[&str] = &[
    "Math", "JSON", "Array", "Object", "String", "Number", "Boolean", "Map", "Set", "Promise",
    "RegExp", "Date", "Error", "TypeError", "RangeError", "console", "fetch", "undefined",
    "NaN", "Infinity", "globalThis", "parseInt", "parseFloat", "isNaN", "isFinite",
    "structuredClone", "Uint8Array", "URL", "URLSearchParams", "Headers", "TextEncoder",
    "TextDecoder",
];

/// JS-level polyfills for the Web platform pieces generated handlers are
/// promised but that QuickJS doesn't ship natively. Evaluated once at
/// sandbox setup, before the global object is pruned. `structuredClone` is
/// a JSON round trip, which covers every value shape a handler can produce
/// since handler results are themselves JSON-serialized; it isn't a general
/// deep-clone (functions, `Map`/`Set`, cycles aren't representable here).
const SANDBOX_PRELUDE: &str = r##"
class URLSearchParams {
    constructor(init) {
        this._params = [];
        if (typeof init === "string") {
            const s = init.startsWith("?") ? init.slice(1) : init;
            if (s.length > 0) {
                for (const pair of s.split("&")) {
                    const [k, v] = pair.split("=");
                    this._params.push([decodeURIComponent(k || ""), decodeURIComponent(v || "")]);
                }
            }
        } else if (init && typeof init === "object") {
            for (const key of Object.keys(init)) {
                this._params.push([key, String(init[key])]);
            }
        }
    }
    get(name) {
        const found = this._params.find((p) => p[0] === name);
        return found ? found[1] : null;
    }
    getAll(name) {
        return this._params.filter((p) => p[0] === name).map((p) => p[1]);
    }
    has(name) {
        return this._params.some((p) => p[0] === name);
    }
    set(name, value) {
        this._params = this._params.filter((p) => p[0] !== name);
        this._params.push([name, String(value)]);
    }
    append(name, value) {
        this._params.push([name, String(value)]);
    }
    toString() {
        return this._params.map((p) => encodeURIComponent(p[0]) + "=" + encodeURIComponent(p[1])).join("&");
    }
}

class URL {
    constructor(input, base) {
        const absoluteRe = /^[a-zA-Z][a-zA-Z0-9+.-]*:\/\//;
        const resolved = base && !absoluteRe.test(input)
            ? new URL(base).href.replace(/[^/]*$/, "") + input
            : input;
        const re = /^([a-zA-Z][a-zA-Z0-9+.-]*):\/\/([^/?#]*)([^?#]*)(?:\?([^#]*))?(?:#(.*))?$/;
        const m = re.exec(resolved);
        if (!m) {
            throw new TypeError("invalid URL: " + input);
        }
        const hostSplit = m[2].split(":");
        this.protocol = m[1] + ":";
        this.host = m[2];
        this.hostname = hostSplit[0];
        this.port = hostSplit[1] || "";
        this.pathname = m[3] || "/";
        this.search = m[4] ? "?" + m[4] : "";
        this.hash = m[5] ? "#" + m[5] : "";
        this.searchParams = new URLSearchParams(m[4] || "");
        this.href = resolved;
    }
    toString() {
        return this.href;
    }
}

class Headers {
    constructor(init) {
        this._headers = {};
        if (init && typeof init === "object") {
            for (const key of Object.keys(init)) {
                this._headers[key.toLowerCase()] = String(init[key]);
            }
        }
    }
    get(name) {
        const value = this._headers[name.toLowerCase()];
        return value === undefined ? null : value;
    }
    has(name) {
        return Object.prototype.hasOwnProperty.call(this._headers, name.toLowerCase());
    }
    set(name, value) {
        this._headers[name.toLowerCase()] = String(value);
    }
    append(name, value) {
        const key = name.toLowerCase();
        this._headers[key] = this._headers[key] ? this._headers[key] + ", " + value : String(value);
    }
}

class TextEncoder {
    encode(input) {
        const str = String(input === undefined ? "" : input);
        const bytes = [];
        for (let i = 0; i < str.length; i++) {
            const code = str.codePointAt(i);
            if (code > 0xffff) i++;
            if (code < 0x80) {
                bytes.push(code);
            } else if (code < 0x800) {
                bytes.push(0xc0 | (code >> 6), 0x80 | (code & 0x3f));
            } else if (code < 0x10000) {
                bytes.push(0xe0 | (code >> 12), 0x80 | ((code >> 6) & 0x3f), 0x80 | (code & 0x3f));
            } else {
                bytes.push(
                    0xf0 | (code >> 18),
                    0x80 | ((code >> 12) & 0x3f),
                    0x80 | ((code >> 6) & 0x3f),
                    0x80 | (code & 0x3f),
                );
            }
        }
        return new Uint8Array(bytes);
    }
}

class TextDecoder {
    decode(bytes) {
        const arr = bytes instanceof Uint8Array ? bytes : new Uint8Array(bytes || []);
        let out = "";
        let i = 0;
        while (i < arr.length) {
            const b0 = arr[i++];
            if (b0 < 0x80) {
                out += String.fromCodePoint(b0);
            } else if ((b0 & 0xe0) === 0xc0) {
                const b1 = arr[i++];
                out += String.fromCodePoint(((b0 & 0x1f) << 6) | (b1 & 0x3f));
            } else if ((b0 & 0xf0) === 0xe0) {
                const b1 = arr[i++];
                const b2 = arr[i++];
                out += String.fromCodePoint(((b0 & 0x0f) << 12) | ((b1 & 0x3f) << 6) | (b2 & 0x3f));
            } else {
                const b1 = arr[i++];
                const b2 = arr[i++];
                const b3 = arr[i++];
                out += String.fromCodePoint(
                    ((b0 & 0x07) << 18) | ((b1 & 0x3f) << 12) | ((b2 & 0x3f) << 6) | (b3 & 0x3f),
                );
            }
        }
        return out;
    }
}

function structuredClone(value) {
    return JSON.parse(JSON.stringify(value));
}
"##;

pub struct Sandbox {
    runtime: AsyncRuntime,
    context: AsyncContext,
}

impl Sandbox {
    pub async fn new(fetch: Arc<dyn GatedFetch>) -> Result<Self> {
        let runtime = AsyncRuntime::new().map_err(|e| Error::Sandbox(format!("runtime init: {e}")))?;
        let context = AsyncContext::full(&runtime)
            .await
            .map_err(|e| Error::Sandbox(format!("context init: {e}")))?;

        rquickjs::async_with!(context => |ctx| {
            install_console(&ctx)?;
            install_prelude(&ctx)?;
            install_fetch(&ctx, fetch.clone())?;
            prune_globals(&ctx)?;
            Ok::<_, rquickjs::Error>(())
        })
        .await
        .map_err(|e| Error::Sandbox(format!("global setup failed: {e}")))?;

        Ok(Self { runtime, context })
    }

    /// Runs a compiled handler body against a JSON args object, enforcing
    /// the execution timeout and validating the returned shape.
    pub async fn run_handler(&self, handler_source: &str, args: serde_json::Value) -> Result<ToolResult> {
        let wrapped = crate::compiler::wrap_handler_source(handler_source);
        let args_json = serde_json::to_string(&args)
            .map_err(|e| Error::Sandbox(format!("args are not serializable: {e}")))?;

        let run = rquickjs::async_with!(self.context => |ctx| {
            let globals = ctx.globals();
            let parsed_args: rquickjs::Value = ctx
                .json_parse(args_json)
                .catch(&ctx)
                .map_err(|e| Error::Sandbox(format!("failed to load args into sandbox: {e}")))?;
            let fetch_fn: rquickjs::Function = globals
                .get("fetch")
                .map_err(|e| Error::Sandbox(format!("fetch binding missing: {e}")))?;

            let handler: rquickjs::Function = ctx
                .eval(wrapped.clone())
                .catch(&ctx)
                .map_err(|e| Error::Sandbox(format!("handler source failed to evaluate: {e}")))?;

            let result: rquickjs::promise::Promise = handler
                .call((parsed_args, fetch_fn))
                .catch(&ctx)
                .map_err(|e| Error::Sandbox(format!("handler invocation failed: {e}")))?;
            let value: rquickjs::Value = result
                .into_future()
                .await
                .catch(&ctx)
                .map_err(|e| Error::Sandbox(format!("handler rejected: {e}")))?;

            let raw: String = ctx
                .json_stringify(value)
                .catch(&ctx)
                .map_err(|e| Error::Sandbox(format!("handler result is not serializable: {e}")))?
                .ok_or_else(|| Error::Sandbox("handler returned undefined".to_string()))?
                .to_string()
                .map_err(|e| Error::Sandbox(format!("handler result is not a string: {e}")))?;

            parse_tool_result(&raw)
        });

        tokio::time::timeout(EXECUTION_TIMEOUT, run)
            .await
            .map_err(|_| Error::Sandbox(format!(
                "handler exceeded the {}s execution timeout",
                EXECUTION_TIMEOUT.as_secs()
            )))?
    }

    /// Idle the runtime's background job queue; called during orchestrator
    /// shutdown so promises scheduled by an in-flight handler don't leak.
    pub async fn idle(&self) {
        self.runtime.idle().await;
    }
}

fn install_console(ctx: &rquickjs::Ctx<'_>) -> rquickjs::Result<()> {
    let console = rquickjs::Object::new(ctx.clone())?;
    console.set(
        "log",
        rquickjs::Function::new(ctx.clone(), |msg: rquickjs::Value| {
            tracing::info!(target: "mcpboot::sandbox", "{}", format_js_value(&msg));
        })?,
    )?;
    ctx.globals().set("console", console)?;
    Ok(())
}

fn install_prelude(ctx: &rquickjs::Ctx<'_>) -> rquickjs::Result<()> {
    ctx.eval::<(), _>(SANDBOX_PRELUDE)?;
    Ok(())
}

fn format_js_value(value: &rquickjs::Value) -> String {
    if let Some(s) = value.as_string() {
        s.to_string().unwrap_or_default()
    } else {
        format!("{value:?}")
    }
}

/// Installs a `fetch(url, init)` global bound to the gated capability. The
/// returned Response-like object shims the subset of the real Fetch API
/// spec handler source is expected to use: `status`, `ok`, `statusText`,
/// `headers.get(name)`, `text()`, and `json()`.
fn install_fetch<'js>(ctx: &rquickjs::Ctx<'js>, fetch: Arc<dyn GatedFetch>) -> rquickjs::Result<()> {
    let fetch_fn = rquickjs::Function::new(
        ctx.clone(),
        rquickjs::function::Async(move |ctx: rquickjs::Ctx<'js>, url: String, init: Option<rquickjs::Object<'js>>| {
            let fetch = fetch.clone();
            async move {
                let gated_init = parse_fetch_init(init)?;
                let response = fetch.fetch(&url, gated_init).await.map_err(|e| {
                    rquickjs::Exception::throw_type(&ctx, &e.to_string())
                })?;
                build_response_object(&ctx, response)
            }
        }),
    )?;
    ctx.globals().set("fetch", fetch_fn)?;
    Ok(())
}

fn parse_fetch_init(init: Option<rquickjs::Object<'_>>) -> rquickjs::Result<mcpboot_core::GatedFetchInit> {
    let mut out = mcpboot_core::GatedFetchInit::default();
    let Some(init) = init else { return Ok(out) };
    if let Ok(method) = init.get::<_, String>("method") {
        out.method = Some(method);
    }
    if let Ok(body) = init.get::<_, String>("body") {
        out.body = Some(body);
    }
    if let Ok(headers) = init.get::<_, rquickjs::Object<'_>>("headers") {
        for key in headers.keys::<String>().flatten() {
            if let Ok(value) = headers.get::<_, String>(&key) {
                out.headers.insert(key, value);
            }
        }
    }
    Ok(out)
}

fn build_response_object<'js>(
    ctx: &rquickjs::Ctx<'js>,
    response: mcpboot_core::GatedFetchResponse,
) -> rquickjs::Result<rquickjs::Object<'js>> {
    let obj = rquickjs::Object::new(ctx.clone())?;
    obj.set("status", response.status)?;
    obj.set("ok", response.ok())?;
    obj.set("statusText", response.status_text.clone())?;

    let headers_obj = rquickjs::Object::new(ctx.clone())?;
    let headers_map = response.headers.clone();
    headers_obj.set(
        "get",
        rquickjs::Function::new(ctx.clone(), move |name: String| {
            headers_map.get(&name.to_ascii_lowercase()).cloned()
        }),
    )?;
    obj.set("headers", headers_obj)?;

    let text = response.text_lossy();
    let text_for_text = text.clone();
    obj.set(
        "text",
        rquickjs::Function::new(ctx.clone(), move || text_for_text.clone()),
    )?;
    obj.set(
        "json",
        rquickjs::Function::new(ctx.clone(), move |ctx: rquickjs::Ctx<'js>| -> rquickjs::Result<rquickjs::Value<'js>> {
            ctx.json_parse(text.clone())
        }),
    )?;

    Ok(obj)
}

/// Deletes every own property of `globalThis` that isn't on the curated
/// allow list, closing off everything the handler hasn't been explicitly
/// given (dynamic code evaluation, filesystem/process shims QuickJS itself
/// doesn't expose, and so on are already absent; this closes what remains).
fn prune_globals(ctx: &rquickjs::Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    let keys: Vec<String> = globals.keys::<String>().flatten().collect();
    for key in keys {
        if !ALLOWED_GLOBALS.contains(&key.as_str()) {
            globals.remove(key)?;
        }
    }
    Ok(())
}

fn parse_tool_result(raw: &str) -> Result<ToolResult> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Error::Sandbox(format!("handler result is not valid JSON: {e}")))?;

    let content = value
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Error::Sandbox(
            "handler result must be an object with a \"content\" array".to_string(),
        ))?;

    let mut items = Vec::with_capacity(content.len());
    for item in content {
        let kind = item.get("type").and_then(|t| t.as_str()).unwrap_or_default();
        let text = item.get("text").and_then(|t| t.as_str()).unwrap_or_default();
        if kind != "text" {
            return Err(Error::Sandbox(format!(
                "handler result content item has unsupported type \"{kind}\" (only \"text\" is supported)"
            )));
        }
        items.push(ToolContent::text(text));
    }

    Ok(ToolResult {
        content: items,
        is_error: None,
    })
}
