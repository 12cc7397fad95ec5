//! Chat-completions client implementing the `Generate` capability.
//!
//! Speaks the OpenRouter/OpenAI wire format. Rate limits and server errors
//! are retried with exponential backoff; everything else surfaces as an
//! error for the caller's fallback path to absorb.

use assay_core::util::char_prefix;
use assay_core::Generate;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

pub const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = char_prefix(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated.to_string()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<i32>,
}

/// Extract a retry-after hint from an error body ("retry after 12 seconds").
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

fn map_transport_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow::anyhow!("Model request timed out")
    } else if err.is_connect() {
        anyhow::anyhow!("Could not connect to the model endpoint")
    } else {
        err.into()
    }
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[derive(Debug, Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    initial_backoff: Duration,
}

impl ModelClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        let factor = BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor as u32)
    }

    async fn send_with_retry(&self, prompt: &str) -> anyhow::Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut retry_count = 0;
        loop {
            let response = match self
                .http
                .post(&self.api_url)
                .header("Content-Type", "application/json")
                .header("X-Title", "assay")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        warn!(attempt = retry_count, error = %err, "model request failed; retrying");
                        tokio::time::sleep(self.backoff(retry_count)).await;
                        continue;
                    }
                    return Err(map_transport_error(err));
                }
            };

            let status = response.status();
            let text = response.text().await.map_err(map_transport_error)?;

            if status.is_success() {
                // Some gateways report upstream failures with a 200 status.
                if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(&text) {
                    let retryable = envelope
                        .error
                        .code
                        .map(|c| c >= 500 || c == 429)
                        .unwrap_or(true);
                    if retryable && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        tokio::time::sleep(self.backoff(retry_count)).await;
                        continue;
                    }
                    return Err(anyhow::anyhow!(
                        "Model error: {}",
                        sanitize_api_response(&envelope.error.message)
                    ));
                }
                return extract_content(&text);
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let wait = parse_retry_after(&text)
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.backoff(retry_count))
                    .min(self.backoff(MAX_RETRIES + 2));
                warn!(attempt = retry_count, wait_ms = wait.as_millis() as u64, "rate limited by model endpoint");
                tokio::time::sleep(wait).await;
                continue;
            }

            if status.is_server_error() && retry_count < MAX_RETRIES {
                retry_count += 1;
                tokio::time::sleep(self.backoff(retry_count)).await;
                continue;
            }

            let message = match status.as_u16() {
                401 => "Invalid model API key".to_string(),
                429 => format!("Rate limited after {} retries", retry_count),
                500..=599 => format!("Model server error ({})", status),
                _ => format!("API error {}: {}", status, sanitize_api_response(&text)),
            };
            return Err(anyhow::anyhow!("{}", message));
        }
    }
}

fn extract_content(text: &str) -> anyhow::Result<String> {
    let parsed: ChatResponse = serde_json::from_str(text)
        .map_err(|e| anyhow::anyhow!("Failed to parse model response: {}", e))?;
    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| anyhow::anyhow!("Model response had no choices"))?;
    if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(anyhow::anyhow!(
            "Model refused: {}",
            sanitize_api_response(&refusal)
        ));
    }
    let content = message.content.unwrap_or_default();
    debug!(chars = content.chars().count(), "model reply received");
    Ok(content)
}

impl Generate for ModelClient {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(self.send_with_retry(prompt))
    }
}
