use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{GenerationError, GenerationRequest, Generator};
use crate::config::{EndpointsConfig, RephraseConfig};
use crate::store::Provider;

const ANTHROPIC_VERSION: &str = "2023-06-01";

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Messages API endpoint
#[must_use]
pub fn anthropic_url(base: &str) -> String {
    join(base, "v1/messages")
}

/// `generateContent` endpoint for `model`
#[must_use]
pub fn google_url(base: &str, model: &str) -> String {
    join(base, &format!("v1beta/models/{model}:generateContent"))
}

/// OpenAI-compatible chat completions endpoint
#[must_use]
pub fn chat_url(base: &str) -> String {
    join(base, "chat/completions")
}

/// Single-turn Messages API body
#[must_use]
pub fn anthropic_body(model: &str, prompt: &str, max_tokens: u32) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [{ "role": "user", "content": prompt }],
    })
}

/// Single-turn `generateContent` body
#[must_use]
pub fn google_body(prompt: &str, max_tokens: u32) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": { "maxOutputTokens": max_tokens },
    })
}

/// Single-turn chat completions body
#[must_use]
pub fn chat_body(model: &str, prompt: &str, max_tokens: u32) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [{ "role": "user", "content": prompt }],
    })
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Debug, Deserialize)]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleContent>,
}

#[derive(Debug, Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Debug, Deserialize)]
struct GooglePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, GenerationError> {
    serde_json::from_str(body).map_err(|e| GenerationError::MalformedResponse(e.to_string()))
}

fn non_empty(text: &str, what: &str) -> Result<String, GenerationError> {
    let text = text.trim();
    if text.is_empty() {
        Err(GenerationError::MalformedResponse(format!("{what} contained no text")))
    } else {
        Ok(text.to_owned())
    }
}

/// Concatenated text blocks of a Messages API response
///
/// # Errors
/// Returns [`GenerationError::MalformedResponse`] if the body is not a
/// messages response or holds no text
pub fn parse_anthropic(body: &str) -> Result<String, GenerationError> {
    let response: AnthropicResponse = decode(body)?;
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    non_empty(&text, "anthropic response")
}

/// Text parts of the first `generateContent` candidate
///
/// # Errors
/// Returns [`GenerationError::MalformedResponse`] if there is no candidate
/// text (including safety-blocked responses)
pub fn parse_google(body: &str) -> Result<String, GenerationError> {
    let response: GoogleResponse = decode(body)?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    non_empty(&text, "google response")
}

/// First choice's message content
///
/// # Errors
/// Returns [`GenerationError::MalformedResponse`] if there is no choice text
pub fn parse_chat(body: &str) -> Result<String, GenerationError> {
    let response: ChatResponse = decode(body)?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    non_empty(&text, "chat response")
}

/// Provider error message from an error body, else the trimmed raw body
#[must_use]
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
        |_| body.trim().to_owned(),
        |envelope| envelope.error.message,
    )
}

/// [`Generator`] that calls the hosted provider APIs over HTTPS
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoints: EndpointsConfig,
    max_tokens: u32,
}

impl HttpGenerator {
    /// Build the HTTP client from the rephrase settings
    ///
    /// # Errors
    /// Returns error if the TLS backend cannot be initialized
    pub fn new(config: &RephraseConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(config.attempt_timeout())
            .build()?;
        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            max_tokens: config.max_tokens,
        })
    }

    async fn post(
        &self,
        request: reqwest::RequestBuilder,
        body: &Value,
    ) -> Result<String, GenerationError> {
        let response = request.json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        Ok(text)
    }
}

impl Generator for HttpGenerator {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, GenerationError> {
        let GenerationRequest {
            provider,
            api_key,
            model,
            prompt,
        } = request;
        debug!(provider = %provider, model, prompt_len = prompt.len(), "calling provider");

        match provider {
            Provider::Anthropic => {
                let builder = self
                    .client
                    .post(anthropic_url(&self.endpoints.anthropic))
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION);
                let body = self
                    .post(builder, &anthropic_body(model, prompt, self.max_tokens))
                    .await?;
                parse_anthropic(&body)
            }
            Provider::Google => {
                let builder = self
                    .client
                    .post(google_url(&self.endpoints.google, model))
                    .header("x-goog-api-key", api_key);
                let body = self.post(builder, &google_body(prompt, self.max_tokens)).await?;
                parse_google(&body)
            }
            Provider::Meta => {
                let builder = self
                    .client
                    .post(chat_url(&self.endpoints.meta))
                    .bearer_auth(api_key);
                let body = self
                    .post(builder, &chat_body(model, prompt, self.max_tokens))
                    .await?;
                parse_chat(&body)
            }
        }
    }
}
