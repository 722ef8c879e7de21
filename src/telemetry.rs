use anyhow::{anyhow, Context, Result};
use std::fs::{self, OpenOptions};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, TelemetryConfig};

const DEFAULT_FILTER: &str = "info";

/// Filter from `RUST_LOG`, falling back to `info`
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging: to the log file when enabled, else stdout
///
/// # Errors
/// Returns error if the log file cannot be opened or a subscriber is
/// already installed
pub fn init(config: &TelemetryConfig) -> Result<()> {
    if !config.enabled {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;
        install_panic_hook();
        return Ok(());
    }

    let expanded_path = Config::expand_path(&config.log_path)?;

    if let Some(parent) = expanded_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&expanded_path)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;
    install_panic_hook();

    tracing::info!("telemetry initialized: {}", expanded_path.display());

    Ok(())
}

/// Log panics through tracing before the default hook prints them
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_default();
        tracing::error!(location = %location, message = %payload, "panic");
        default_hook(info);
    }));
}
