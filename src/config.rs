use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::Provider;

/// Daemon settings loaded from `~/.rephrase-hotkey.toml`
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Profile store location
    #[serde(default)]
    pub store: StoreConfig,
    /// Selection capture timing
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Generation calls and fallback ladders
    #[serde(default)]
    pub rephrase: RephraseConfig,
    /// Config sync listener
    #[serde(default)]
    pub ipc: IpcConfig,
    /// Logging
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Where profiles, API keys and bindings live
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Path to the store TOML file (`~/` is expanded)
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "~/.rephrase-hotkey/store.toml".to_owned(),
        }
    }
}

/// Clipboard polling parameters
#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    /// Interval between clipboard reads
    pub poll_interval_ms: u64,
    /// Give up waiting for the copy after this long
    pub timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 25,
            timeout_ms: 1000,
        }
    }
}

impl CaptureConfig {
    /// Poll interval as a `Duration`
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Capture deadline as a `Duration`
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Generation call settings
#[derive(Debug, Deserialize, Clone)]
pub struct RephraseConfig {
    /// Upper bound for a single model attempt
    pub attempt_timeout_secs: u64,
    /// `max_tokens` sent to providers that require it
    pub max_tokens: u32,
    /// Provider base URLs
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    /// Per-provider fallback ladder overrides
    #[serde(default)]
    pub fallbacks: FallbacksConfig,
}

impl Default for RephraseConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: 30,
            max_tokens: 1000,
            endpoints: EndpointsConfig::default(),
            fallbacks: FallbacksConfig::default(),
        }
    }
}

impl RephraseConfig {
    /// Attempt timeout as a `Duration`
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Fallback model lists replacing the built-in ladders
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct FallbacksConfig {
    /// Gemini fallbacks
    pub google: Option<Vec<String>>,
    /// Llama fallbacks
    pub meta: Option<Vec<String>>,
    /// Claude fallbacks
    pub anthropic: Option<Vec<String>>,
}

impl FallbacksConfig {
    /// Override for `provider`, if configured
    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<&[String]> {
        match provider {
            Provider::Google => self.google.as_deref(),
            Provider::Meta => self.meta.as_deref(),
            Provider::Anthropic => self.anthropic.as_deref(),
        }
    }
}

/// Base URLs of the generation services
#[derive(Debug, Deserialize, Clone)]
pub struct EndpointsConfig {
    /// Anthropic Messages API
    pub anthropic: String,
    /// Google Generative Language API
    pub google: String,
    /// OpenAI-compatible Llama API
    pub meta: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            anthropic: "https://api.anthropic.com".to_owned(),
            google: "https://generativelanguage.googleapis.com".to_owned(),
            meta: "https://api.llama.com/compat/v1".to_owned(),
        }
    }
}

/// Localhost sync channel for the settings UI
#[derive(Debug, Deserialize, Clone)]
pub struct IpcConfig {
    /// Whether to accept sync connections at all
    pub enabled: bool,
    /// `host:port` to bind
    pub address: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1:47615".to_owned(),
        }
    }
}

/// Log output settings
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Log to file instead of stdout
    pub enabled: bool,
    /// Log file path (`~/` is expanded)
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: "~/.rephrase-hotkey/rephrase.log".to_owned(),
        }
    }
}

const DEFAULT_CONFIG: &str = r#"[store]
path = "~/.rephrase-hotkey/store.toml"

[capture]
poll_interval_ms = 25
timeout_ms = 1000

[rephrase]
attempt_timeout_secs = 30
max_tokens = 1000

[rephrase.endpoints]
anthropic = "https://api.anthropic.com"
google = "https://generativelanguage.googleapis.com"
meta = "https://api.llama.com/compat/v1"

[ipc]
enabled = true
address = "127.0.0.1:47615"

[telemetry]
enabled = true
log_path = "~/.rephrase-hotkey/rephrase.log"
"#;

impl Config {
    /// Load config from ~/.rephrase-hotkey.toml, writing the default on first run
    ///
    /// # Errors
    /// Returns error if HOME is unset or the file cannot be read or parsed
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        Self::load_from(&config_path)
    }

    /// Load config from an explicit path
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).context("failed to read config file")?;
        Self::parse(&contents)
    }

    /// Parse config TOML
    ///
    /// # Errors
    /// Returns error on invalid TOML or unknown provider names
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".rephrase-hotkey.toml"))
    }

    fn create_default(path: &Path) -> Result<()> {
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        Ok(())
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if the path starts with `~/` and HOME is unset
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}
