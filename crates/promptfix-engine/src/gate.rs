//! One-time human-verification token holder.
//!
//! The gate owns the token value and hands it to the orchestrator per call.
//! A consumed token is never offered again; the widget must complete anew.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Absent,
    Valid(String),
    /// A successful call used the token. Behaves like `Absent`.
    ConsumedAwaitingNew,
}

#[derive(Debug, Default)]
pub struct TokenGate {
    state: GateState,
    last_error: Option<String>,
}

impl TokenGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate that starts out holding `token` (if non-blank).
    pub fn with_token(token: Option<String>) -> Self {
        let mut gate = Self::new();
        if let Some(token) = token {
            // A blank preset token simply leaves the gate absent.
            let _ = gate.complete_widget(token);
        }
        gate
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// The widget produced a token.
    pub fn complete_widget(&mut self, token: impl Into<String>) -> anyhow::Result<()> {
        let token = token.into();
        let token = token.trim();
        if token.is_empty() {
            self.widget_error("verification returned an empty token");
            return Err(anyhow::anyhow!("Verification token is empty"));
        }
        self.state = GateState::Valid(token.to_string());
        self.last_error = None;
        Ok(())
    }

    /// The widget failed or expired; drop any held token.
    pub fn widget_error(&mut self, reason: &str) {
        tracing::warn!("verification widget error: {}", reason);
        self.state = GateState::Absent;
        self.last_error = Some(format!("Security check failed: {}", reason));
    }

    /// Invalidate after a successful orchestrator call.
    pub fn consume(&mut self) {
        if matches!(self.state, GateState::Valid(_)) {
            tracing::debug!("verification token consumed");
            self.state = GateState::ConsumedAwaitingNew;
        }
    }

    pub fn token(&self) -> Option<&str> {
        match &self.state {
            GateState::Valid(token) => Some(token),
            GateState::Absent | GateState::ConsumedAwaitingNew => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.token().is_some()
    }

    /// True once a token has been used and a fresh one is needed.
    pub fn awaiting_new(&self) -> bool {
        self.state == GateState::ConsumedAwaitingNew
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
