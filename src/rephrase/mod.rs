//! Rephrase invoker: composes the prompt and walks a model fallback ladder.

/// HTTP clients for the generation providers
pub mod provider;

pub use provider::HttpGenerator;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::FallbacksConfig;
use crate::input::clipboard::generate_text_preview;
use crate::store::{Profile, Provider};

/// A single generation call failed
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Request could not be sent or the body not read
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Provider error message, or the raw body
        message: String,
    },

    /// Response body did not contain generated text
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Attempt exceeded its time budget
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// One generation call
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Which service to call
    pub provider: Provider,
    /// User-supplied key for that service
    pub api_key: &'a str,
    /// Concrete model id
    pub model: &'a str,
    /// Full prompt text
    pub prompt: &'a str,
}

/// Per-provider text generation service
pub trait Generator: Send + Sync {
    /// Generate text for one model; every error means "this model failed"
    fn generate(
        &self,
        request: GenerationRequest<'_>,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;
}

/// One failed rung of the ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFailure {
    /// Model that was tried
    pub model: String,
    /// Rendered error
    pub error: String,
}

/// User-facing classification of an invocation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Key missing, rejected, or unauthorized
    InvalidApiKey,
    /// Rate limit or quota exhausted
    QuotaExceeded,
    /// Anything else
    Generic,
}

/// Rephrasing could not produce text
#[derive(Debug, Error)]
pub enum InvocationError {
    /// Text, prompt or API key was empty
    #[error("missing required input: {0}")]
    MissingInput(&'static str),

    /// Every model in the ladder failed
    #[error("all {attempted} models failed; last error: {}", last_error(.failures))]
    AllModelsFailed {
        /// Number of models tried
        attempted: usize,
        /// Failures in ladder order
        failures: Vec<ModelFailure>,
    },
}

fn last_error(failures: &[ModelFailure]) -> &str {
    failures.last().map_or("none", |f| f.error.as_str())
}

const KEY_MARKERS: &[&str] = &[
    "api key",
    "api_key",
    "x-api-key",
    "http 401",
    "http 403",
    "unauthorized",
    "authentication",
    "permission_denied",
];

const QUOTA_MARKERS: &[&str] = &[
    "quota",
    "http 429",
    "rate limit",
    "rate_limit",
    "resource_exhausted",
    "overloaded",
];

impl InvocationError {
    /// Classify by inspecting the underlying error text
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingInput(field) if *field == "api key" => FailureKind::InvalidApiKey,
            Self::MissingInput(_) => FailureKind::Generic,
            Self::AllModelsFailed { failures, .. } => {
                let texts: Vec<String> = failures.iter().map(|f| f.error.to_lowercase()).collect();
                let mentions = |markers: &[&str]| {
                    texts
                        .iter()
                        .any(|t| markers.iter().any(|marker| t.contains(marker)))
                };
                if mentions(KEY_MARKERS) {
                    FailureKind::InvalidApiKey
                } else if mentions(QUOTA_MARKERS) {
                    FailureKind::QuotaExceeded
                } else {
                    FailureKind::Generic
                }
            }
        }
    }

    /// Message suitable for showing to the user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.kind() {
            FailureKind::InvalidApiKey => {
                "Invalid API key. Please check your API key in Settings.".to_owned()
            }
            FailureKind::QuotaExceeded => {
                "API quota exceeded. Please check your account limits or try again later."
                    .to_owned()
            }
            FailureKind::Generic => format!("Unable to generate response: {self}."),
        }
    }
}

/// Successful rephrase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rephrasing {
    /// Generated text
    pub text: String,
    /// Model that produced it
    pub model: String,
    /// Models that failed before it, in order
    pub failures: Vec<ModelFailure>,
}

/// Ordered fallback models per provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackLadders {
    google: Vec<String>,
    meta: Vec<String>,
    anthropic: Vec<String>,
}

fn owned(models: &[&str]) -> Vec<String> {
    models.iter().map(|m| (*m).to_owned()).collect()
}

impl Default for FallbackLadders {
    fn default() -> Self {
        Self {
            google: owned(&["gemini-1.5-pro", "gemini-1.5-flash", "gemini-pro"]),
            meta: owned(&[
                "Llama-3.3-70B-Instruct",
                "Llama-4-Maverick-17B-128E-Instruct-FP8",
            ]),
            anthropic: owned(&[
                "claude-3-5-sonnet-latest",
                "claude-3-opus-latest",
                "claude-3-haiku-20240307",
            ]),
        }
    }
}

impl FallbackLadders {
    /// Built-in ladders with any configured overrides applied
    #[must_use]
    pub fn from_config(config: &FallbacksConfig) -> Self {
        let mut ladders = Self::default();
        for provider in Provider::ALL {
            if let Some(models) = config.get(provider) {
                ladders.set(provider, models.to_vec());
            }
        }
        ladders
    }

    /// Replace the fallback list for `provider`
    pub fn set(&mut self, provider: Provider, models: Vec<String>) {
        match provider {
            Provider::Google => self.google = models,
            Provider::Meta => self.meta = models,
            Provider::Anthropic => self.anthropic = models,
        }
    }

    /// Fallback list for `provider`
    #[must_use]
    pub fn fallbacks(&self, provider: Provider) -> &[String] {
        match provider {
            Provider::Google => &self.google,
            Provider::Meta => &self.meta,
            Provider::Anthropic => &self.anthropic,
        }
    }

    /// Requested model first, then the fallbacks, normalized and deduplicated
    #[must_use]
    pub fn candidates(&self, provider: Provider, requested: &str) -> Vec<String> {
        let mut ladder: Vec<String> = Vec::new();
        let requested = requested.trim();
        let rungs = std::iter::once(requested)
            .filter(|m| !m.is_empty())
            .chain(self.fallbacks(provider).iter().map(String::as_str));
        for model in rungs {
            let model = normalize_model(provider, model);
            if !ladder.contains(&model) {
                ladder.push(model);
            }
        }
        ladder
    }
}

/// Map UI model ids onto the ids the provider API expects
///
/// Strips catalog prefixes (`googleai/`, `anthropic/`, `meta/`, `models/`) and
/// resolves Anthropic family aliases such as `claude-3.5-sonnet`.
#[must_use]
pub fn normalize_model(provider: Provider, model: &str) -> String {
    let model = model.trim();
    let prefixes: &[&str] = match provider {
        Provider::Google => &["googleai/", "google/", "models/"],
        Provider::Meta => &["meta/"],
        Provider::Anthropic => &["anthropic/"],
    };
    let bare = prefixes
        .iter()
        .find_map(|p| model.strip_prefix(p))
        .unwrap_or(model);

    if provider == Provider::Anthropic {
        let alias = match bare.to_ascii_lowercase().as_str() {
            "sonnet" | "claude-3.5-sonnet" | "claude-3-5-sonnet" => Some("claude-3-5-sonnet-latest"),
            "opus" | "claude-3-opus" => Some("claude-3-opus-latest"),
            "haiku" | "claude-3-haiku" => Some("claude-3-haiku-20240307"),
            _ => None,
        };
        if let Some(alias) = alias {
            return alias.to_owned();
        }
    }
    bare.to_owned()
}

/// `prompt`, a blank line, then the selected text
#[must_use]
pub fn compose_prompt(prompt: &str, text: &str) -> String {
    format!("{prompt}\n\n{text}")
}

/// Runs a profile's rephrase against a [`Generator`] with model fallback
pub struct RephraseInvoker<G> {
    generator: G,
    ladders: FallbackLadders,
    attempt_timeout: Duration,
}

impl<G: Generator> RephraseInvoker<G> {
    /// Invoker with explicit ladders and per-attempt timeout
    pub const fn new(generator: G, ladders: FallbackLadders, attempt_timeout: Duration) -> Self {
        Self {
            generator,
            ladders,
            attempt_timeout,
        }
    }

    /// Ladders in use
    pub const fn ladders(&self) -> &FallbackLadders {
        &self.ladders
    }

    /// Rephrase `text` with `profile`, trying each ladder model once
    ///
    /// # Errors
    /// [`InvocationError::MissingInput`] before any call when text, prompt or
    /// key is empty; [`InvocationError::AllModelsFailed`] when every model fails
    pub async fn invoke(
        &self,
        text: &str,
        profile: &Profile,
        api_key: &str,
    ) -> Result<Rephrasing, InvocationError> {
        if text.trim().is_empty() {
            return Err(InvocationError::MissingInput("text"));
        }
        if profile.prompt.trim().is_empty() {
            return Err(InvocationError::MissingInput("prompt"));
        }
        if api_key.trim().is_empty() {
            return Err(InvocationError::MissingInput("api key"));
        }

        let prompt = compose_prompt(&profile.prompt, text);
        let candidates = self.ladders.candidates(profile.provider, &profile.model);
        debug!(
            profile = %profile.name,
            provider = %profile.provider,
            candidates = ?candidates,
            "rephrase ladder"
        );

        let mut failures = Vec::new();
        for model in &candidates {
            info!(model = %model, provider = %profile.provider, "trying model");
            let request = GenerationRequest {
                provider: profile.provider,
                api_key,
                model,
                prompt: &prompt,
            };
            let attempt =
                tokio::time::timeout(self.attempt_timeout, self.generator.generate(request)).await;
            let result = attempt.unwrap_or(Err(GenerationError::Timeout(self.attempt_timeout)));

            match result {
                Ok(output) => {
                    info!(
                        model = %model,
                        failed_before = failures.len(),
                        text_preview = %generate_text_preview(&output),
                        "rephrase succeeded"
                    );
                    return Ok(Rephrasing {
                        text: output,
                        model: model.clone(),
                        failures,
                    });
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "model failed, trying next");
                    failures.push(ModelFailure {
                        model: model.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(InvocationError::AllModelsFailed {
            attempted: candidates.len(),
            failures,
        })
    }
}
