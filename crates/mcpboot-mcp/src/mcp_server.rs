//! The MCP surface: a manual `ServerHandler` over a runtime-built tool
//! table, served over streamable HTTP.
//!
//! Grounded on `unicitynetwork-unicity-orchestrator`'s `StreamableHttpService`
//! + `LocalSessionManager` + `axum::serve` wiring for the transport, and on
//! `indielab-kaish`'s `KaishServerHandler` for writing `ServerHandler` by
//! hand instead of through rmcp's `#[tool_router]` macro — mcpboot's tool
//! set is only known once generation finishes, so it can't be a compile-time
//! router.

use mcpboot_local::executor::Executor;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::transport::streamable_http_server::{session::local::LocalSessionManager, StreamableHttpService};
use rmcp::{ErrorData as McpError, ServerHandler};
use std::sync::Arc;

/// The name `tools/list` hides from clients but that integration tests and
/// operators can call directly to introspect what got generated, without
/// needing a side channel into the process.
const METADATA_TOOL_NAME: &str = "_mcp_metadata";

#[derive(Clone)]
pub struct McpBootServer {
    executor: Arc<Executor>,
    prompt: String,
}

impl McpBootServer {
    pub fn new(executor: Arc<Executor>, prompt: String) -> Self {
        Self { executor, prompt }
    }

    pub fn tool_catalog(&self) -> Vec<rmcp::model::Tool> {
        self.executor
            .list_tools()
            .into_iter()
            .map(|planned| {
                let schema = match planned.input_schema {
                    serde_json::Value::Object(map) => map,
                    other => {
                        let mut map = serde_json::Map::new();
                        map.insert("type".to_string(), serde_json::json!("object"));
                        map.insert("value".to_string(), other);
                        map
                    }
                };
                rmcp::model::Tool {
                    name: planned.name.into(),
                    title: None,
                    description: Some(planned.description.into()),
                    input_schema: Arc::new(schema),
                    output_schema: None,
                    annotations: None,
                    icons: None,
                    meta: None,
                }
            })
            .collect()
    }

    pub fn metadata_result(&self) -> CallToolResult {
        let tools = self.executor.tools();
        let payload = serde_json::json!({
            "stage": "boot",
            "version": env!("CARGO_PKG_VERSION"),
            "prompt": self.prompt,
            "toolCount": tools.tools.len(),
            "whitelistDomains": tools.whitelist_domains,
            "tools": tools.tools.values().map(|t| serde_json::json!({
                "name": t.plan.name,
                "needsNetwork": t.plan.needs_network,
                "endpointsUsed": t.plan.endpoints_used,
                "handlerSource": t.handler_source,
            })).collect::<Vec<_>>(),
        });
        CallToolResult {
            content: vec![Content::text(payload.to_string())],
            structured_content: None,
            is_error: Some(false),
            meta: None,
        }
    }
}

impl ServerHandler for McpBootServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "Generated tool server for the prompt: \"{}\". Call `{METADATA_TOOL_NAME}` for \
                 generation metadata.",
                self.prompt
            )),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: self.tool_catalog(),
            next_cursor: None,
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let name = request.name.to_string();
        if name == METADATA_TOOL_NAME {
            return Ok(self.metadata_result());
        }

        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(Default::default()));

        let result = self
            .executor
            .execute(&name, args)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        Ok(CallToolResult {
            content: result.content.into_iter().map(|c| Content::text(c.text)).collect(),
            structured_content: None,
            is_error: result.is_error,
            meta: None,
        })
    }
}

/// Serves the MCP endpoint at `/mcp` plus a `/health` liveness route,
/// binding to `port` (0 for an ephemeral port). Writes the resolved base
/// URL to stdout once bound, but only when stdout isn't a terminal, so a
/// parent process can pipe it straight into an MCP client config without
/// scraping log output; blocks until either the listener errors or a
/// Ctrl-C/SIGTERM arrives.
pub async fn serve(server: McpBootServer, port: u16) -> anyhow::Result<()> {
    let health_server = server.clone();
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new()
        .route(
            "/health",
            axum::routing::get(move || {
                let server = health_server.clone();
                async move {
                    axum::Json(serde_json::json!({
                        "status": "ok",
                        "tools": server.tool_catalog().len(),
                    }))
                }
            }),
        )
        .nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let bound_addr = listener.local_addr()?;
    let url = format!("http://{bound_addr}/mcp");

    // Pipe-handoff: the only thing mcpboot ever writes to stdout, and only
    // when stdout isn't a terminal a human is staring at. Startup status
    // always goes to stderr via tracing regardless.
    if !std::io::IsTerminal::is_terminal(&std::io::stdout()) {
        println!("{url}");
    }
    tracing::info!(%url, "MCP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpboot_core::{CompiledTool, CompiledTools, GatedFetch, GatedFetchInit, GatedFetchResponse, PlannedTool, Result};
    use mcpboot_local::sandbox::Sandbox;

    struct NoFetch;

    #[async_trait::async_trait]
    impl GatedFetch for NoFetch {
        async fn fetch(&self, _url: &str, _init: GatedFetchInit) -> Result<GatedFetchResponse> {
            Err(mcpboot_core::Error::WhitelistViolation("no network in this test".to_string()))
        }
    }

    async fn sample_server() -> McpBootServer {
        let sandbox = Sandbox::new(Arc::new(NoFetch)).await.unwrap();
        let tool = CompiledTool {
            plan: PlannedTool {
                name: "greet".to_string(),
                description: "says hello".to_string(),
                input_schema: serde_json::json!({"type": "object", "properties": {"name": {"type": "string"}}}),
                endpoints_used: vec![],
                implementation_notes: "n".to_string(),
                needs_network: false,
            },
            handler_source: "return { content: [{ type: \"text\", text: \"hello \" + args.name }] };".to_string(),
        };
        let tools = Arc::new(CompiledTools::from_plan_and_tools(vec![tool], vec![]));
        let executor = Arc::new(Executor::new(tools, Arc::new(sandbox)));
        McpBootServer::new(executor, "say hello".to_string())
    }

    #[tokio::test]
    async fn tool_catalog_excludes_nothing_but_exposes_real_tools() {
        let server = sample_server().await;
        let catalog = server.tool_catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "greet");
    }

    #[tokio::test]
    async fn metadata_result_reports_tool_count_and_handler_source() {
        let server = sample_server().await;
        let result = server.metadata_result();
        let text = match &result.content[0].raw {
            rmcp::model::RawContent::Text(t) => t.text.clone(),
            _ => panic!("expected text content"),
        };
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["toolCount"], 1);
        assert_eq!(parsed["stage"], "boot");
        assert!(parsed["version"].as_str().is_some());
        assert_eq!(parsed["whitelistDomains"], serde_json::json!([]));
        assert!(parsed["tools"][0]["handlerSource"].as_str().unwrap().contains("hello"));
    }
}
