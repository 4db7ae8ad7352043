use crate::history::HistoryEntry;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Upper bound on a single message body sent upstream.
pub const MAX_CONTENT_CHARS: usize = 100_000;
/// Inclusive bounds for `max_tokens`.
pub const MAX_TOKENS_RANGE: (u32, u32) = (1, 100_000);
/// Inclusive bounds for `temperature`.
pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);

/// Which generation transition is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initial,
    BatchRefine,
    AutoRefine,
}

impl Phase {
    /// Batch and auto refinement share the refinement output rules.
    pub fn is_refinement(&self) -> bool {
        !matches!(self, Phase::Initial)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Initial => "initial",
            Phase::BatchRefine => "batch-refine",
            Phase::AutoRefine => "auto-refine",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Optional sampling knobs forwarded to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One outbound generation call: directive + task text, sampling, and the
/// verification token that authorizes it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingParams,
    pub verification_token: Option<String>,
}

impl GenerationRequest {
    /// System directive first, then the composed user turn.
    pub fn new(directive: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(directive), ChatMessage::user(task)],
            sampling: SamplingParams::default(),
            verification_token: None,
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.verification_token = token;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), RequestValidationError> {
        if self.messages.is_empty() {
            return Err(RequestValidationError::new("messages must be a non-empty array"));
        }
        if self
            .messages
            .iter()
            .any(|m| m.content.chars().count() > MAX_CONTENT_CHARS)
        {
            return Err(RequestValidationError::new(format!(
                "payload too large: message content exceeds {} characters",
                MAX_CONTENT_CHARS
            )));
        }
        self.sampling.validate()
    }
}

impl SamplingParams {
    pub fn validate(&self) -> std::result::Result<(), RequestValidationError> {
        if let Some(t) = self.temperature {
            let (lo, hi) = TEMPERATURE_RANGE;
            if !(lo..=hi).contains(&t) {
                return Err(RequestValidationError::new(
                    "temperature must be between 0 and 2",
                ));
            }
        }
        if let Some(n) = self.max_tokens {
            let (lo, hi) = MAX_TOKENS_RANGE;
            if !(lo..=hi).contains(&n) {
                return Err(RequestValidationError::new(
                    "max_tokens must be between 1 and 100000",
                ));
            }
        }
        Ok(())
    }
}

/// A request that must not be sent as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestValidationError {
    pub message: String,
}

impl RequestValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RequestValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid request: {}", self.message)
    }
}

impl std::error::Error for RequestValidationError {}

/// The model call behind the retrying transport. Resolves to the first
/// candidate's text (empty when the reply carries none).
pub trait Upstream: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Read/write contract for the history cache's backing store.
pub trait HistoryPersistence: Send + Sync {
    /// Empty on absence or corruption.
    fn load(&self) -> Vec<HistoryEntry>;

    fn save(&self, entries: &[HistoryEntry]) -> Result<()>;
}
