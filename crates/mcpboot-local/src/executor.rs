//! Tool dispatch: `listTools()` and `execute(name, args)` over a compiled
//! tool table and a sandbox.

use mcpboot_core::{CompiledTools, Error, PlannedTool, Result, ToolResult};
use std::sync::Arc;

use crate::sandbox::Sandbox;

pub struct Executor {
    tools: Arc<CompiledTools>,
    sandbox: Arc<Sandbox>,
}

impl Executor {
    pub fn new(tools: Arc<CompiledTools>, sandbox: Arc<Sandbox>) -> Self {
        Self { tools, sandbox }
    }

    /// The plan side of each compiled tool, in the order they were
    /// compiled, for MCP's `tools/list`.
    pub fn list_tools(&self) -> Vec<PlannedTool> {
        self.tools.tools.values().map(|t| t.plan.clone()).collect()
    }

    /// The full compiled tool table, handler source included, for callers
    /// that need more than the plan (e.g. the metadata diagnostic tool).
    pub fn tools(&self) -> &CompiledTools {
        &self.tools
    }

    /// Runs a tool by name. Both an unknown name and a handler exception
    /// surface as an error-shaped `ToolResult` rather than a thrown `Error`:
    /// the tool table is fixed at startup, but callers still need a result
    /// they can hand straight back over MCP without a protocol-level fault.
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> Result<ToolResult> {
        let Some(tool) = self.tools.tools.get(name) else {
            return Ok(ToolResult::error(format!("Unknown tool: {name}")));
        };

        match self.sandbox.run_handler(&tool.handler_source, args).await {
            Ok(result) => Ok(result),
            Err(e) => Ok(ToolResult::error(format!("Handler error: {e}"))),
        }
    }
}
