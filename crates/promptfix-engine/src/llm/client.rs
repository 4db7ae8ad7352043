use promptfix_adapters::config::Config;
use promptfix_adapters::verify::SiteVerifier;
use promptfix_adapters::ConfigurationError;
use promptfix_core::protocol::{ChatMessage, GenerationRequest, Upstream};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Maximum length for error content in log lines
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Shown to users for any non-2xx upstream reply.
const UPSTREAM_FAILURE_MESSAGE: &str = "Failed to process request with AI service";

/// Sanitize API response content for logs to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "key=",
        "sk-",
    ];

    let truncated = truncate_str(content, MAX_ERROR_CONTENT_LEN);

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(response details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated.to_string()
}

/// Truncate a string for display (Unicode-safe)
fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// The model provider answered with a non-success status. The body only goes
/// to the debug log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamStatusError {
    pub status: u16,
}

impl std::fmt::Display for UpstreamStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (status {})", UPSTREAM_FAILURE_MESSAGE, self.status)
    }
}

impl std::error::Error for UpstreamStatusError {}

/// Exactly the fields forwarded to the provider. The verification token is
/// never part of this body.
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    /// Providers occasionally send `null` for the list or for an entry
    #[serde(default)]
    choices: Option<Vec<Option<Choice>>>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<MessageContent>,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Content can be null when the provider refuses or filters a reply
    #[serde(default)]
    content: Option<String>,
}

/// Text of the first candidate, or empty when the reply carries none.
fn extract_content(body: &str) -> anyhow::Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        tracing::debug!("unreadable upstream body: {}", sanitize_api_response(body));
        anyhow::anyhow!("Failed to parse AI service response: {}", e)
    })?;
    Ok(parsed
        .choices
        .unwrap_or_default()
        .into_iter()
        .next()
        .flatten()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .unwrap_or_default())
}

/// Create a configured HTTP client for upstream requests
fn create_http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))
}

fn map_timeout_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow::anyhow!("AI service request timed out")
    } else if err.is_connect() {
        anyhow::anyhow!("Failed to communicate with AI service")
    } else {
        err.into()
    }
}

/// Verifying gateway in front of an OpenAI-compatible chat completions API.
///
/// Each call checks the verification token first (when required), then the
/// API key, then forwards the whitelisted request fields.
pub struct GatewayClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    verifier: Option<SiteVerifier>,
}

impl GatewayClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        verifier: Option<SiteVerifier>,
        timeout_secs: u64,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: create_http_client(timeout_secs)?,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            verifier,
        })
    }

    /// Build from loaded config and environment secrets. Verification is
    /// wired in only when the config requires it.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let verifier = if config.require_verification {
            Some(SiteVerifier::new(
                config.verify_endpoint.clone(),
                config.verification_secret(),
            )?)
        } else {
            None
        };
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            config.get_api_key(),
            verifier,
            config.request_timeout_secs,
        )
    }

    pub fn verifies_tokens(&self) -> bool {
        self.verifier.is_some()
    }

    async fn forward(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        request.validate()?;

        if let Some(verifier) = &self.verifier {
            verifier
                .verify(request.verification_token.as_deref())
                .await?;
        }

        let Some(api_key) = self.api_key.as_deref() else {
            tracing::error!("upstream API key is missing");
            return Err(ConfigurationError::new("API Key missing").into());
        };

        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.sampling.temperature,
            max_tokens: request.sampling.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_timeout_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_timeout_error)?;

        if !status.is_success() {
            tracing::debug!(
                status = status.as_u16(),
                "upstream error body: {}",
                sanitize_api_response(&text)
            );
            return Err(UpstreamStatusError {
                status: status.as_u16(),
            }
            .into());
        }

        extract_content(&text)
    }
}

impl Upstream for GatewayClient {
    fn complete<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(self.forward(request))
    }
}
