//! Installs the structured, leveled logger the service runs on.
//!
//! Built on `tracing` + `tracing-subscriber` rather than a hand-rolled
//! reporter: the core is a long-running async service with many concurrent
//! tasks, and `tracing`'s buffered writer satisfies "log writes never block
//! core paths" without a bespoke logging thread.

use crate::config::LogLevel;

/// Installs a global `fmt` subscriber at `level`. Call once, at service
/// startup; the CLI's own `ensure` client path keeps the plain `Reporter`
/// stderr output instead (see `agent-cli`).
pub fn init(level: LogLevel) {
    let max_level = match level {
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Warning => tracing::Level::WARN,
        LogLevel::Error => tracing::Level::ERROR,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(false)
        .try_init();
}
