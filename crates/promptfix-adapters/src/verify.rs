//! Server-side check of human-verification tokens against a siteverify
//! endpoint. Fails closed when the secret is not configured.

use crate::error::{ConfigurationError, VerificationRejected};
use serde::Deserialize;
use std::time::Duration;

const VERIFY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SiteVerifier {
    client: reqwest::Client,
    endpoint: String,
    secret: Option<String>,
}

impl SiteVerifier {
    pub fn new(endpoint: impl Into<String>, secret: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(VERIFY_TIMEOUT_SECS))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            secret: secret.filter(|s| !s.trim().is_empty()),
        })
    }

    /// Accepts or rejects `token`. Missing secret is a [`ConfigurationError`],
    /// a refused or missing token is [`VerificationRejected`].
    pub async fn verify(&self, token: Option<&str>) -> anyhow::Result<()> {
        let Some(secret) = self.secret.as_deref() else {
            tracing::error!("verification secret is missing; rejecting all tokens");
            return Err(ConfigurationError::new("verification secret missing").into());
        };

        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Err(VerificationRejected {
                error_codes: vec!["missing-input-response".to_string()],
            }
            .into());
        };

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("secret", secret), ("response", token)])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("verification service error: {}", e);
                anyhow::anyhow!("Failed to connect to verification service")
            })?;

        let body = response
            .text()
            .await
            .map_err(|_| anyhow::anyhow!("Failed to read verification service response"))?;

        interpret_siteverify(&body)
    }
}

fn interpret_siteverify(body: &str) -> anyhow::Result<()> {
    let parsed: SiteVerifyResponse = serde_json::from_str(body)
        .map_err(|_| anyhow::anyhow!("Verification service returned an unreadable response"))?;
    if parsed.success {
        Ok(())
    } else {
        tracing::warn!(codes = ?parsed.error_codes, "verification rejected");
        Err(VerificationRejected {
            error_codes: parsed.error_codes,
        }
        .into())
    }
}
