//! The single validated options struct the rest of the core reads from.
//!
//! Mirrors the teacher's `RuntimeOptions` pattern at a smaller scale: CLI
//! flags are assembled into one struct rather than read ad-hoc throughout
//! the service. No on-disk config file — §6 scopes configuration to CLI
//! flags and `$HOME`, and nothing here asks for more.

use std::path::PathBuf;
use std::time::Duration;

use agent_retry::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub root: PathBuf,
    pub pipe_base: String,
    pub max_concurrent_downloads: usize,
    pub registries: Vec<String>,
    pub preserve_tarballs: bool,
    pub http_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub log_level: LogLevel,
}

/// Default resolution retry cap above which delays stop growing.
const RESOLUTION_MAX_DELAY: Duration = Duration::from_secs(120);
const RESOLUTION_JITTER_MAX: Duration = Duration::from_millis(200);

impl AgentConfig {
    /// Default cache root, `~/.fhir`, used when `--root` is omitted.
    pub fn default_root() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".fhir")
    }

    /// Default pipe base, `fhir-ig-agent-<user>`.
    pub fn default_pipe_base() -> String {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        format!("fhir-ig-agent-{user}")
    }

    /// The `agent-retry` schedule this config implies for resolution
    /// retries (§4.5: `base * 2^(attempt-1)` plus 0-200ms jitter).
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: self.retry_delay,
            max_delay: RESOLUTION_MAX_DELAY,
            jitter_max: RESOLUTION_JITTER_MAX,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            root: Self::default_root(),
            pipe_base: Self::default_pipe_base(),
            max_concurrent_downloads: 4,
            registries: Vec::new(),
            preserve_tarballs: false,
            http_timeout: Duration::from_secs(10 * 60),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            log_level: LogLevel::Info,
        }
    }
}
