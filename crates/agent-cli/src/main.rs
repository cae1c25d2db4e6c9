use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use agent_core::config::AgentConfig;
use agent_core::engine::{self, EnsureOutcome};

#[derive(Parser, Debug)]
#[command(name = "fhir-ig-agent", version)]
#[command(about = "Download coordinator for FHIR Implementation Guide packages")]
struct Cli {
    /// Cache root (default: ~/.fhir)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Base name for the IPC endpoints this cache root derives (default: fhir-ig-agent-<user>)
    #[arg(long)]
    pipe: Option<String>,

    /// Maximum concurrent tarball transfers
    #[arg(long = "max")]
    max_concurrent_downloads: Option<usize>,

    /// Comma-separated registry base URLs, tried in order
    #[arg(long, value_delimiter = ',')]
    registries: Vec<String>,

    /// Keep the downloaded tarball in the staging directory after extraction
    #[arg(long)]
    preserve_tar: bool,

    /// HTTP request timeout (e.g. 10m, 30s)
    #[arg(long)]
    http_timeout: Option<String>,

    /// Max resolution retry attempts per request
    #[arg(long)]
    max_retries: Option<u32>,

    /// Base retry backoff delay (e.g. 1s)
    #[arg(long)]
    retry_delay: Option<String>,

    /// debug | info | warning | error
    #[arg(long)]
    log_level: Option<String>,

    /// Run only the background service, blocking until idle.
    #[arg(long)]
    agent: bool,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ensure a package is cached locally, starting the background service if needed.
    Ensure { id: String, version: String },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;

    if cli.agent {
        runtime.block_on(engine::run_agent(config)).context("agent service failed")?;
        return Ok(ExitCode::SUCCESS);
    }

    match cli.cmd {
        Some(Commands::Ensure { id, version }) => Ok(runtime.block_on(run_ensure(&config, &id, &version))),
        None => {
            eprintln!("[error] expected a subcommand: `ensure <id> <version>`, or `--agent`");
            Ok(ExitCode::from(2))
        }
    }
}

async fn run_ensure(config: &AgentConfig, id: &str, version: &str) -> ExitCode {
    let outcome = engine::ensure(config, id, version, |event| {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
    })
    .await;

    match outcome {
        Ok(EnsureOutcome::Path(path)) => {
            println!("{}", serde_json::json!({ "path": path }));
            ExitCode::SUCCESS
        }
        Ok(EnsureOutcome::Error(message)) => {
            eprintln!("[error] {message}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("[error] {e}");
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> Result<AgentConfig> {
    let mut config = AgentConfig::default();
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(pipe) = &cli.pipe {
        config.pipe_base = pipe.clone();
    }
    if let Some(max) = cli.max_concurrent_downloads {
        config.max_concurrent_downloads = max;
    }
    if !cli.registries.is_empty() {
        config.registries = cli.registries.clone();
    }
    config.preserve_tarballs = cli.preserve_tar;
    if let Some(t) = &cli.http_timeout {
        config.http_timeout = parse_duration(t)?;
    }
    if let Some(r) = cli.max_retries {
        config.max_retries = r;
    }
    if let Some(d) = &cli.retry_delay {
        config.retry_delay = parse_duration(d)?;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    }
    Ok(config)
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}
