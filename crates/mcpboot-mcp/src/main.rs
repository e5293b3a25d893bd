use anyhow::Result;
use clap::Parser;
use std::path::Path;

use mcpboot_mcp::config::{Cli, Config};
use mcpboot_mcp::mcp_server::{self, McpBootServer};
use mcpboot_mcp::orchestrator::{self, RunOutcome};

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))?;

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_target(false)
                .compact()
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
                .init();
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    init_logging(&config.log_level, config.log_file.as_deref())?;

    let prompt = config.prompt.clone();
    let port = config.port;

    let outcome = orchestrator::run(config).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let startup = match outcome {
        RunOutcome::DryRun => return Ok(()),
        RunOutcome::Ready(startup) => startup,
    };
    tracing::info!(
        tools = startup.tools.tools.len(),
        from_cache = startup.from_cache,
        "generation complete"
    );

    let server = McpBootServer::new(startup.executor, prompt);
    mcp_server::serve(server, port).await
}
