/// A required secret or setting is missing. Always fails closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Server misconfiguration: {}", self.message)
    }
}

impl std::error::Error for ConfigurationError {}

/// The verification service refused the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRejected {
    pub error_codes: Vec<String>,
}

impl std::fmt::Display for VerificationRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.error_codes.is_empty() {
            write!(f, "Verification failed")
        } else {
            write!(f, "Verification failed ({})", self.error_codes.join(", "))
        }
    }
}

impl std::error::Error for VerificationRejected {}
