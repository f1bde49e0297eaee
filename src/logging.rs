use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter expression
pub const LOG_ENV: &str = "OLLAMA_CHAT_LOG";

pub fn log_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow!("Could not determine data directory"))?;
    Ok(data_dir.join("ollama-chat").join("logs"))
}

/// Filter from OLLAMA_CHAT_LOG, then the configured level, then "info"
fn build_filter(configured: Option<&str>) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return filter;
    }
    match configured.map(str::parse::<EnvFilter>) {
        Some(Ok(filter)) => filter,
        Some(Err(e)) => {
            eprintln!(
                "WARN: log_level is not a valid tracing filter ({}); falling back to 'info'",
                e
            );
            EnvFilter::new("info")
        }
        None => EnvFilter::new("info"),
    }
}

/// Send logs to a daily file; the terminal belongs to the UI.
///
/// Keep the returned guard alive for the life of the program so buffered
/// lines are flushed on exit.
pub fn init(configured: Option<&str>) -> Result<WorkerGuard> {
    let dir = log_dir()?;
    std::fs::create_dir_all(&dir)?;

    let appender = tracing_appender::rolling::daily(&dir, "ollama-chat.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(build_filter(configured))
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .init();

    Ok(guard)
}
