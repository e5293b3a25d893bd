//! Validated startup configuration, built from CLI flags with environment
//! fallback for API keys. Grounded on the teacher's `Cli`/`Commands` clap
//! structs, flattened to a single command since this binary does exactly
//! one thing: generate a tool server from a prompt and serve it.

use clap::Parser;
use mcpboot_core::Error;
use mcpboot_local::llm::Provider;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mcpboot")]
#[command(about = "Synthesizes an MCP tool server from a natural-language prompt", long_about = None)]
pub struct Cli {
    /// What tools to build, in plain language. Mutually exclusive with
    /// `--prompt-file`; exactly one of the two is required.
    #[arg(long)]
    pub prompt: Option<String>,

    /// Read the prompt from a file instead of `--prompt`.
    #[arg(long = "prompt-file")]
    pub prompt_file: Option<PathBuf>,

    /// Reference URL to fetch and show the planner (repeatable). Every
    /// domain reachable from these URLs, plus any URL literally present in
    /// `--prompt`, becomes network-whitelisted for generated tools.
    #[arg(long = "url")]
    pub urls: Vec<String>,

    /// LLM provider to plan and compile tools with.
    #[arg(long, default_value = "anthropic")]
    pub provider: String,

    /// Model name override; defaults to the provider's default model.
    #[arg(long)]
    pub model: Option<String>,

    /// API key; falls back to the provider's default env var
    /// (ANTHROPIC_API_KEY / OPENAI_API_KEY) when omitted.
    #[arg(long, env = "MCPBOOT_API_KEY")]
    pub api_key: Option<String>,

    /// TCP port to serve the MCP endpoint on. Pass 0 explicitly to pick an
    /// ephemeral port.
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Directory for cached generation results.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Skip the cache entirely, forcing a fresh plan and compile.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    /// Plan and compile the tools, print the resulting plan as JSON to
    /// stdout, and exit without starting the server.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Shorthand for `--log-level debug`.
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// Append logs to this file instead of stderr.
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Log level filter passed to `tracing_subscriber::EnvFilter`.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub prompt: String,
    pub urls: Vec<String>,
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub port: u16,
    pub cache_dir: PathBuf,
    pub no_cache: bool,
    pub dry_run: bool,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".mcpboot-cache")
}

fn resolve_prompt(cli: &Cli) -> Result<String, Error> {
    match (&cli.prompt, &cli.prompt_file) {
        (Some(_), Some(_)) => Err(Error::Config(
            "--prompt and --prompt-file are mutually exclusive".to_string(),
        )),
        (Some(prompt), None) => Ok(prompt.clone()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read --prompt-file {}: {e}", path.display()))),
        (None, None) => Err(Error::Config("either --prompt or --prompt-file is required".to_string())),
    }
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, Error> {
        let prompt = resolve_prompt(&cli)?;
        if prompt.trim().is_empty() {
            return Err(Error::Config("prompt must not be empty".to_string()));
        }

        let provider = Provider::parse(&cli.provider).ok_or_else(|| {
            Error::Config(format!(
                "unknown provider \"{}\" (expected \"anthropic\" or \"openai\")",
                cli.provider
            ))
        })?;

        let api_key = cli
            .api_key
            .clone()
            .or_else(|| std::env::var(provider.env_key_var()).ok())
            .ok_or_else(|| {
                Error::Config(format!(
                    "no API key: pass --api-key or set {}",
                    provider.env_key_var()
                ))
            })?;

        let model = cli.model.clone().unwrap_or_else(|| provider.default_model().to_string());
        let cache_dir = cli.cache_dir.clone().unwrap_or_else(default_cache_dir);
        let log_level = if cli.verbose { "debug".to_string() } else { cli.log_level };

        Ok(Self {
            prompt,
            urls: cli.urls,
            provider,
            model,
            api_key,
            port: cli.port,
            cache_dir,
            no_cache: cli.no_cache,
            dry_run: cli.dry_run,
            log_level,
            log_file: cli.log_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            prompt: Some("build a calculator".to_string()),
            prompt_file: None,
            urls: vec![],
            provider: "anthropic".to_string(),
            model: None,
            api_key: Some("sk-test".to_string()),
            port: 8000,
            cache_dir: None,
            no_cache: false,
            dry_run: false,
            verbose: false,
            log_file: None,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn rejects_empty_prompt() {
        let mut cli = base_cli();
        cli.prompt = Some("   ".to_string());
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_missing_prompt_and_prompt_file() {
        let mut cli = base_cli();
        cli.prompt = None;
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_prompt_and_prompt_file_together() {
        let mut cli = base_cli();
        cli.prompt_file = Some(PathBuf::from("whatever.txt"));
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn reads_prompt_from_file_when_given() {
        let mut cli = base_cli();
        cli.prompt = None;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "build a todo list").unwrap();
        cli.prompt_file = Some(file.path().to_path_buf());
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.prompt, "build a todo list");
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut cli = base_cli();
        cli.provider = "bedrock".to_string();
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn fills_in_default_model_for_provider() {
        let config = Config::from_cli(base_cli()).unwrap();
        assert_eq!(config.model, Provider::Anthropic.default_model());
    }

    #[test]
    fn requires_an_api_key_from_flag_or_env() {
        let mut cli = base_cli();
        cli.api_key = None;
        std::env::remove_var("ANTHROPIC_API_KEY");
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn default_cache_dir_is_dot_mcpboot_cache() {
        let config = Config::from_cli(base_cli()).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from(".mcpboot-cache"));
    }

    #[test]
    fn verbose_overrides_log_level_to_debug() {
        let mut cli = base_cli();
        cli.verbose = true;
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.log_level, "debug");
    }
}
