//! Startup sequence: prompt + URLs in, a running `Executor` and tool table
//! out. One function per stage, called in order from `main`, so each stage
//! is independently testable.

use mcpboot_core::{CompiledTools, FetchedContent, GatedFetch, GenerationPlan, LlmClient, Result};
use mcpboot_local::cache::{self, Cache};
use mcpboot_local::executor::Executor;
use mcpboot_local::llm::{AnthropicClient, OpenAiCompatClient, Provider};
use mcpboot_local::sandbox::Sandbox;
use mcpboot_local::whitelist::{GatedHttpFetch, Whitelist};
use mcpboot_local::{compiler, fetcher, planner};
use std::sync::Arc;

use crate::config::Config;

pub struct Startup {
    pub executor: Arc<Executor>,
    pub tools: Arc<CompiledTools>,
    pub from_cache: bool,
}

/// What `run` produced: either a server ready to bind, or a finished dry
/// run (the plan has already been printed to stdout; there's nothing left
/// to serve).
pub enum RunOutcome {
    DryRun,
    Ready(Startup),
}

fn build_llm_client(config: &Config, http: reqwest::Client) -> Arc<dyn LlmClient> {
    match config.provider {
        Provider::Anthropic => Arc::new(AnthropicClient::new(http, config.api_key.clone(), config.model.clone())),
        Provider::OpenAi => {
            Arc::new(OpenAiCompatClient::new(http, Some(config.api_key.clone()), config.model.clone()))
        }
    }
}

/// Fetches every reference URL, tolerating individual failures: a document
/// that can't be retrieved just doesn't inform planning, it doesn't abort
/// startup.
async fn fetch_reference_documents(config: &Config, http: &reqwest::Client) -> Vec<FetchedContent> {
    if config.urls.is_empty() {
        return Vec::new();
    }
    fetcher::fetch_all(http, &config.urls).await
}

pub async fn run(config: Config) -> Result<RunOutcome> {
    let http = fetcher::build_client()?;

    let mut prompt_urls = fetcher::extract_urls(&config.prompt);
    prompt_urls.extend(config.urls.iter().cloned());

    let documents = fetch_reference_documents(&config, &http).await;
    let whitelist_domains = Whitelist::build(&prompt_urls, &documents).domains();

    tracing::info!(
        urls = config.urls.len(),
        documents = documents.len(),
        domains = whitelist_domains.len(),
        "reference documents fetched"
    );

    let cache = Cache::new(&config.cache_dir);
    let prompt_fp = cache::prompt_fingerprint(&config.prompt);
    let content_fp = cache::content_fingerprint(&documents);

    let cached = if config.no_cache {
        None
    } else {
        cache.get(&prompt_fp, &content_fp).await
    };

    let (plan, compiled, from_cache) = if let Some(entry) = cached {
        tracing::info!(prompt_fp, content_fp, "cache hit, skipping planning and compilation");
        (entry.plan, entry.compiled_tools, true)
    } else {
        tracing::info!(prompt_fp, content_fp, "cache miss, planning and compiling");
        let llm = build_llm_client(&config, http.clone());

        let plan = planner::plan(llm.as_ref(), &config.prompt, &documents, &whitelist_domains).await?;
        tracing::info!(tools = plan.tools.len(), "plan accepted");

        if config.dry_run {
            print_dry_run(&config.prompt, &plan, false);
            return Ok(RunOutcome::DryRun);
        }

        let compiled = compiler::compile_plan(llm.as_ref(), &plan.tools).await?;
        tracing::info!(tools = compiled.len(), "compilation succeeded");

        if !config.no_cache {
            if let Err(e) = cache
                .set(&prompt_fp, &content_fp, &plan, &CompiledTools::from_plan_and_tools(compiled.clone(), whitelist_domains.clone()), chrono::Utc::now())
                .await
            {
                tracing::warn!(error = %e, "failed to persist cache entry, continuing uncached");
            }
        }

        (plan, compiled, false)
    };

    if config.dry_run {
        print_dry_run(&config.prompt, &plan, from_cache);
        return Ok(RunOutcome::DryRun);
    }

    let tools = CompiledTools::from_plan_and_tools(compiled, whitelist_domains.clone());
    let fetch: Arc<dyn GatedFetch> = GatedHttpFetch::new(Whitelist::from_domains(tools.whitelist_domains.clone()), http);
    let sandbox = Sandbox::new(fetch).await?;
    let tools = Arc::new(tools);
    let executor = Arc::new(Executor::new(tools.clone(), Arc::new(sandbox)));

    Ok(RunOutcome::Ready(Startup {
        executor,
        tools,
        from_cache,
    }))
}

/// The dry-run short circuit: print the accepted plan as JSON to stdout and
/// let the caller exit without starting the sandbox or the server.
fn print_dry_run(prompt: &str, plan: &GenerationPlan, from_cache: bool) {
    let output = serde_json::json!({
        "prompt": prompt,
        "fromCache": from_cache,
        "plan": plan,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_llm_client_picks_the_configured_provider() {
        let http = reqwest::Client::new();
        let config = Config {
            prompt: "p".to_string(),
            urls: vec![],
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            api_key: "k".to_string(),
            port: 0,
            cache_dir: std::env::temp_dir(),
            no_cache: true,
            dry_run: false,
            log_level: "info".to_string(),
            log_file: None,
        };
        let client = build_llm_client(&config, http);
        assert_eq!(client.identity(), "openai:gpt-4o-mini");
    }
}
