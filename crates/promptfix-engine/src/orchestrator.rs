//! Generation state machine.
//!
//! Owns the current optimized output, the follow-up questions and their
//! pending answers, and the loading/error flags. Every transition takes
//! `&mut self`, so at most one call is in flight per instance.

use crate::gate::TokenGate;
use crate::history::HistoryCache;
use crate::llm::backoff::{call_with_backoff, BackoffPolicy, FixedSchedule, DEFAULT_MAX_ATTEMPTS};
use crate::llm::client::UpstreamStatusError;
use crate::llm::parse::{parse_response, ParsedResponse};
use crate::llm::prompts::{
    auto_refine_user_turn, batch_refine_user_turn, build_directive, initial_user_turn,
};
use promptfix_adapters::config::Config;
use promptfix_adapters::{ConfigurationError, VerificationRejected};
use promptfix_core::history::HistoryEntry;
use promptfix_core::protocol::{
    GenerationRequest, Phase, RequestValidationError, SamplingParams, Upstream,
};
use promptfix_core::strategy::StrategyMode;
use std::collections::BTreeMap;

pub const VERIFICATION_REQUIRED_MESSAGE: &str = "Please complete the security check below.";
const GENERIC_FAILURE_MESSAGE: &str = "Failed to build the prompt. Please try again.";

/// Per-session knobs, usually taken from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub max_attempts: u32,
    /// Production mode: calls without a token are blocked locally.
    pub require_verification: bool,
    pub sampling: SamplingParams,
    pub strategy: StrategyMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            require_verification: true,
            sampling: SamplingParams::default(),
            strategy: StrategyMode::Auto,
        }
    }
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts,
            require_verification: config.require_verification,
            sampling: config.sampling(),
            strategy: config.default_strategy,
        }
    }
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A response was parsed and applied.
    Applied,
    /// Precondition not met; nothing was sent.
    Skipped,
    /// No verification token; nothing was sent.
    Blocked,
    /// The call failed after retries; prior output kept.
    Failed,
    /// The verification service refused the token; prior output kept. The
    /// token is not consumed, so callers decide whether to discard it.
    Rejected,
}

pub struct Orchestrator<U: Upstream> {
    upstream: U,
    backoff: Box<dyn BackoffPolicy>,
    settings: Settings,
    history: HistoryCache,
    optimized_output: String,
    questions: Vec<String>,
    strategy_label: Option<String>,
    pending_answers: BTreeMap<usize, String>,
    loading: bool,
    error: Option<String>,
}

impl<U: Upstream> Orchestrator<U> {
    pub fn new(upstream: U, settings: Settings, history: HistoryCache) -> Self {
        Self {
            upstream,
            backoff: Box::new(FixedSchedule::default()),
            settings,
            history,
            optimized_output: String::new(),
            questions: Vec::new(),
            strategy_label: None,
            pending_answers: BTreeMap::new(),
            loading: false,
            error: None,
        }
    }

    /// Replace the retry delay policy.
    pub fn with_backoff(mut self, policy: Box<dyn BackoffPolicy>) -> Self {
        self.backoff = policy;
        self
    }

    pub fn optimized_output(&self) -> &str {
        &self.optimized_output
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn strategy_label(&self) -> Option<&str> {
        self.strategy_label.as_deref()
    }

    pub fn pending_answers(&self) -> &BTreeMap<usize, String> {
        &self.pending_answers
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    pub fn set_strategy(&mut self, strategy: StrategyMode) {
        self.settings.strategy = strategy;
    }

    /// Record the answer to question `index`. Out-of-range indexes are ignored.
    pub fn set_answer(&mut self, index: usize, answer: impl Into<String>) {
        if index < self.questions.len() {
            self.pending_answers.insert(index, answer.into());
        }
    }

    /// Build the first optimized prompt for `intent`.
    pub async fn generate(&mut self, intent: &str, gate: &mut TokenGate) -> Outcome {
        if intent.trim().is_empty() {
            return Outcome::Skipped;
        }
        let task = initial_user_turn(intent);
        let outcome = self.run(Phase::Initial, task, gate).await;
        if outcome == Outcome::Applied {
            self.history.insert(HistoryEntry::new(
                intent,
                self.optimized_output.clone(),
                self.questions.clone(),
            ));
        }
        outcome
    }

    /// Fold the pending answers into the current prompt. No-op when every
    /// answer is blank.
    pub async fn batch_refine(&mut self, intent: &str, gate: &mut TokenGate) -> Outcome {
        let answers = self.format_answers();
        if answers.is_empty() {
            return Outcome::Skipped;
        }
        let task = batch_refine_user_turn(&self.optimized_output, intent, &answers);
        self.run(Phase::BatchRefine, task, gate).await
    }

    /// Structural self-audit of the current prompt. No-op when there is none.
    pub async fn auto_refine(&mut self, gate: &mut TokenGate) -> Outcome {
        if self.optimized_output.trim().is_empty() {
            return Outcome::Skipped;
        }
        let task = auto_refine_user_turn(&self.optimized_output);
        self.run(Phase::AutoRefine, task, gate).await
    }

    /// One `Q: .. | A: ..` line per non-blank answer, in question order.
    fn format_answers(&self) -> String {
        self.pending_answers
            .iter()
            .filter_map(|(index, answer)| {
                let answer = answer.trim();
                let question = self.questions.get(*index)?;
                (!answer.is_empty()).then(|| format!("Q: {} | A: {}", question, answer))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn run(&mut self, phase: Phase, task: String, gate: &mut TokenGate) -> Outcome {
        let token = gate.token().map(str::to_string);
        if self.settings.require_verification && token.is_none() {
            tracing::info!(phase = phase.label(), "blocked: verification token required");
            self.error = Some(VERIFICATION_REQUIRED_MESSAGE.to_string());
            return Outcome::Blocked;
        }

        self.loading = true;
        self.error = None;
        tracing::info!(phase = phase.label(), strategy = %self.settings.strategy, "generation started");

        let request = GenerationRequest::new(
            build_directive(self.settings.strategy, phase.is_refinement()),
            task,
        )
        .with_sampling(self.settings.sampling)
        .with_token(token);

        let upstream = &self.upstream;
        let request_ref = &request;
        let result = call_with_backoff(
            &*self.backoff,
            self.settings.max_attempts,
            move || upstream.complete(request_ref),
        )
        .await;

        let outcome = match result {
            Ok(raw) => {
                self.apply(parse_response(&raw));
                gate.consume();
                tracing::info!(
                    phase = phase.label(),
                    questions = self.questions.len(),
                    "generation completed"
                );
                Outcome::Applied
            }
            Err(err) => {
                tracing::warn!(phase = phase.label(), "generation failed: {:#}", err);
                self.error = Some(user_message(&err));
                if err.downcast_ref::<VerificationRejected>().is_some() {
                    Outcome::Rejected
                } else {
                    Outcome::Failed
                }
            }
        };
        self.loading = false;
        outcome
    }

    fn apply(&mut self, parsed: ParsedResponse) {
        self.optimized_output = parsed.optimized_text;
        self.questions = parsed.questions;
        self.strategy_label = parsed.strategy_label;
        self.pending_answers.clear();
    }
}

/// The single place failures become user-visible text.
fn user_message(err: &anyhow::Error) -> String {
    if let Some(config) = err.downcast_ref::<ConfigurationError>() {
        return config.to_string();
    }
    if let Some(rejected) = err.downcast_ref::<VerificationRejected>() {
        return format!("{}. Please complete the security check again.", rejected);
    }
    if let Some(invalid) = err.downcast_ref::<RequestValidationError>() {
        return invalid.to_string();
    }
    if let Some(status) = err.downcast_ref::<UpstreamStatusError>() {
        return status.to_string();
    }
    GENERIC_FAILURE_MESSAGE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::MemoryStore;
    use crate::llm::backoff::NoDelay;
    use promptfix_core::protocol::Role;
    use promptfix_core::strategy::Strategy;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    const TEA_INTENT: &str = "Write a landing page for a tea brand";
    const TEA_RESPONSE: &str = "[PROMPT_START]\n## Context ...\n[PROMPT_END]\n[QUESTIONS_START][\"What is the target price point?\"][QUESTIONS_END]\n[FRAMEWORK]CO-STAR[/FRAMEWORK]";

    /// Scripted upstream: pops one reply per call and records each request.
    #[derive(Clone, Default)]
    struct ScriptedUpstream {
        replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
        requests: Arc<Mutex<Vec<GenerationRequest>>>,
    }

    impl ScriptedUpstream {
        fn with_replies(replies: Vec<Result<&str, &str>>) -> Self {
            let replies = replies
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(str::to_string))
                .collect();
            Self {
                replies: Arc::new(Mutex::new(replies)),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_request(&self) -> GenerationRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl Upstream for ScriptedUpstream {
        fn complete<'a>(
            &'a self,
            request: &'a GenerationRequest,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted reply".to_string()));
            Box::pin(async move { reply.map_err(|e| anyhow::anyhow!(e)) })
        }
    }

    /// Upstream whose verification step always refuses the token.
    #[derive(Clone, Default)]
    struct RejectingUpstream {
        calls: Arc<Mutex<usize>>,
    }

    impl Upstream for RejectingUpstream {
        fn complete<'a>(
            &'a self,
            _request: &'a GenerationRequest,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
            *self.calls.lock().unwrap() += 1;
            Box::pin(async {
                Err::<String, _>(anyhow::Error::new(VerificationRejected {
                    error_codes: vec!["timeout-or-duplicate".to_string()],
                }))
            })
        }
    }

    #[tokio::test]
    async fn test_refused_token_reports_rejection() {
        let upstream = RejectingUpstream::default();
        let mut orch = Orchestrator::new(
            upstream.clone(),
            Settings::default(),
            HistoryCache::load(Box::new(MemoryStore::default())),
        )
        .with_backoff(Box::new(NoDelay));
        let mut gate = gate();

        let outcome = orch.generate(TEA_INTENT, &mut gate).await;

        assert_eq!(outcome, Outcome::Rejected);
        assert_eq!(*upstream.calls.lock().unwrap(), DEFAULT_MAX_ATTEMPTS as usize);
        assert!(orch.error().unwrap().contains("timeout-or-duplicate"));
        assert!(!orch.is_loading());
        assert!(orch.history().is_empty());
        // Only success consumes the token.
        assert_eq!(gate.token(), Some("tok"));
    }

    fn orchestrator(
        upstream: ScriptedUpstream,
        store: MemoryStore,
    ) -> Orchestrator<ScriptedUpstream> {
        Orchestrator::new(
            upstream,
            Settings::default(),
            HistoryCache::load(Box::new(store)),
        )
        .with_backoff(Box::new(NoDelay))
    }

    fn gate() -> TokenGate {
        TokenGate::with_token(Some("tok".to_string()))
    }

    #[tokio::test]
    async fn test_tea_brand_scenario() {
        let upstream = ScriptedUpstream::with_replies(vec![Ok(TEA_RESPONSE)]);
        let store = MemoryStore::default();
        let mut orch = orchestrator(upstream.clone(), store.clone());
        let mut gate = gate();

        let outcome = orch.generate(TEA_INTENT, &mut gate).await;

        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(orch.optimized_output(), "## Context ...");
        assert_eq!(orch.questions(), ["What is the target price point?"]);
        assert_eq!(orch.strategy_label(), Some("CO-STAR"));
        assert!(orch.pending_answers().is_empty());
        assert!(!orch.is_loading());
        assert_eq!(orch.error(), None);

        assert_eq!(orch.history().len(), 1);
        assert_eq!(orch.history().entries()[0].intent, TEA_INTENT);
        assert_eq!(store.saved.lock().unwrap().len(), 1);

        let request = upstream.last_request();
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.contains("INTELLIGENT STRATEGY SELECTION"));
        assert!(request.messages[0].content.contains("3-5 refinement questions"));
        assert_eq!(
            request.messages[1].content,
            format!("Original Intent: {}", TEA_INTENT)
        );
        assert_eq!(request.verification_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_success_consumes_token() {
        let upstream = ScriptedUpstream::with_replies(vec![Ok(TEA_RESPONSE)]);
        let mut orch = orchestrator(upstream, MemoryStore::default());
        let mut gate = gate();
        orch.generate(TEA_INTENT, &mut gate).await;
        assert!(gate.awaiting_new());
        assert!(!gate.is_valid());
    }

    #[tokio::test]
    async fn test_five_failures_preserve_output() {
        let upstream = ScriptedUpstream::with_replies(vec![
            Ok(TEA_RESPONSE),
            Err("network down"),
            Err("network down"),
            Err("network down"),
            Err("network down"),
            Err("network down"),
        ]);
        let mut orch = orchestrator(upstream.clone(), MemoryStore::default());
        let mut gate = TokenGate::new();
        gate.complete_widget("first").unwrap();
        orch.generate(TEA_INTENT, &mut gate).await;

        gate.complete_widget("second").unwrap();
        let outcome = orch.auto_refine(&mut gate).await;

        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(upstream.calls(), 6);
        assert!(!orch.is_loading());
        assert_eq!(orch.error(), Some(GENERIC_FAILURE_MESSAGE));
        assert_eq!(orch.optimized_output(), "## Context ...");
        assert_eq!(orch.questions().len(), 1);
        // Failure leaves the token in place.
        assert_eq!(gate.token(), Some("second"));
    }

    #[tokio::test]
    async fn test_missing_token_blocks_without_network() {
        let upstream = ScriptedUpstream::with_replies(vec![Ok(TEA_RESPONSE)]);
        let mut orch = orchestrator(upstream.clone(), MemoryStore::default());
        let mut gate = TokenGate::new();

        let outcome = orch.generate(TEA_INTENT, &mut gate).await;

        assert_eq!(outcome, Outcome::Blocked);
        assert_eq!(upstream.calls(), 0);
        assert_eq!(orch.error(), Some(VERIFICATION_REQUIRED_MESSAGE));
        assert!(!orch.is_loading());
        assert!(orch.history().is_empty());
    }

    #[tokio::test]
    async fn test_consumed_token_blocks_next_call() {
        let upstream = ScriptedUpstream::with_replies(vec![Ok(TEA_RESPONSE), Ok(TEA_RESPONSE)]);
        let mut orch = orchestrator(upstream.clone(), MemoryStore::default());
        let mut gate = gate();
        orch.generate(TEA_INTENT, &mut gate).await;
        let outcome = orch.auto_refine(&mut gate).await;
        assert_eq!(outcome, Outcome::Blocked);
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_development_mode_runs_without_token() {
        let upstream = ScriptedUpstream::with_replies(vec![Ok("plain reply")]);
        let settings = Settings {
            require_verification: false,
            ..Settings::default()
        };
        let mut orch = Orchestrator::new(
            upstream.clone(),
            settings,
            HistoryCache::load(Box::new(MemoryStore::default())),
        )
        .with_backoff(Box::new(NoDelay));
        let mut gate = TokenGate::new();

        assert_eq!(orch.generate("x", &mut gate).await, Outcome::Applied);
        assert_eq!(orch.optimized_output(), "plain reply");
        assert_eq!(upstream.last_request().verification_token, None);
    }

    #[tokio::test]
    async fn test_batch_refine_with_blank_answers_is_noop() {
        let upstream = ScriptedUpstream::with_replies(vec![Ok(TEA_RESPONSE)]);
        let mut orch = orchestrator(upstream.clone(), MemoryStore::default());
        let mut gate = TokenGate::new();
        gate.complete_widget("a").unwrap();
        orch.generate(TEA_INTENT, &mut gate).await;

        gate.complete_widget("b").unwrap();
        orch.set_answer(0, "   ");
        let outcome = orch.batch_refine(TEA_INTENT, &mut gate).await;

        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(upstream.calls(), 1);
        assert_eq!(gate.token(), Some("b"));
    }

    #[tokio::test]
    async fn test_auto_refine_without_output_is_noop() {
        let upstream = ScriptedUpstream::default();
        let mut orch = orchestrator(upstream.clone(), MemoryStore::default());
        let mut gate = gate();
        assert_eq!(orch.auto_refine(&mut gate).await, Outcome::Skipped);
        assert_eq!(upstream.calls(), 0);
        assert_eq!(orch.error(), None);
    }

    #[tokio::test]
    async fn test_batch_refine_prompt_and_state() {
        let first = "[PROMPT_START]base prompt[PROMPT_END][QUESTIONS_START][\"Price?\", \"Audience?\", \"Tone?\"][QUESTIONS_END]";
        let second = "[PROMPT_START]refined prompt[PROMPT_END][QUESTIONS_START][][QUESTIONS_END]";
        let upstream = ScriptedUpstream::with_replies(vec![Ok(first), Ok(second)]);
        let store = MemoryStore::default();
        let mut orch = orchestrator(upstream.clone(), store.clone());
        let mut gate = TokenGate::new();
        gate.complete_widget("a").unwrap();
        orch.generate(TEA_INTENT, &mut gate).await;

        orch.set_answer(2, "playful");
        orch.set_answer(0, "premium");
        orch.set_answer(1, "");
        orch.set_answer(9, "ignored");
        gate.complete_widget("b").unwrap();
        let outcome = orch.batch_refine(TEA_INTENT, &mut gate).await;

        assert_eq!(outcome, Outcome::Applied);
        let request = upstream.last_request();
        let system = &request.messages[0].content;
        let user = &request.messages[1].content;
        assert!(system.contains("0-3 refinement questions"));
        assert!(user.contains("## Current Optimized Prompt (BASE):\nbase prompt"));
        assert!(user.contains(&format!("## Original Intent:\n{}", TEA_INTENT)));
        assert!(user.contains("Q: Price? | A: premium\nQ: Tone? | A: playful"));
        assert!(!user.contains("Audience?"));
        assert!(!user.contains("ignored"));

        assert_eq!(orch.optimized_output(), "refined prompt");
        assert!(orch.questions().is_empty());
        assert!(orch.pending_answers().is_empty());
        // Refinements never add history.
        assert_eq!(orch.history().len(), 1);
        assert_eq!(store.saved.lock().unwrap()[0].optimized_output, "base prompt");
    }

    #[tokio::test]
    async fn test_auto_refine_prompt_embeds_draft() {
        let upstream = ScriptedUpstream::with_replies(vec![
            Ok(TEA_RESPONSE),
            Ok("[PROMPT_START]tighter[PROMPT_END]"),
        ]);
        let mut orch = orchestrator(upstream.clone(), MemoryStore::default());
        let mut gate = gate();
        orch.generate(TEA_INTENT, &mut gate).await;
        gate.complete_widget("next").unwrap();

        assert_eq!(orch.auto_refine(&mut gate).await, Outcome::Applied);
        let user = upstream.last_request().messages[1].content.clone();
        assert!(user.starts_with("Current Draft:\n## Context ..."));
        assert!(user.contains("Preserve all specific details"));
        assert_eq!(orch.optimized_output(), "tighter");
        assert_eq!(orch.strategy_label(), None);
        assert_eq!(orch.history().len(), 1);
    }

    #[tokio::test]
    async fn test_fixed_strategy_reaches_directive() {
        let upstream = ScriptedUpstream::with_replies(vec![Ok(TEA_RESPONSE)]);
        let mut orch = orchestrator(upstream.clone(), MemoryStore::default());
        orch.set_strategy(StrategyMode::Fixed(Strategy::Risen));
        orch.generate("sort a list in rust", &mut gate()).await;
        assert!(upstream.last_request().messages[0]
            .content
            .contains("MANDATORY STRATEGY: RISEN"));
    }

    #[tokio::test]
    async fn test_malformed_response_still_applies() {
        let upstream = ScriptedUpstream::with_replies(vec![Ok(
            "[PROMPT_START]half open\n[QUESTIONS_START]not json[QUESTIONS_END]",
        )]);
        let mut orch = orchestrator(upstream, MemoryStore::default());
        let outcome = orch.generate("x", &mut gate()).await;
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(orch.optimized_output(), "half open");
        assert!(orch.questions().is_empty());
        assert_eq!(orch.error(), None);
    }

    #[tokio::test]
    async fn test_new_call_clears_previous_error() {
        let upstream =
            ScriptedUpstream::with_replies(vec![Err("e"), Ok(TEA_RESPONSE)]);
        let settings = Settings {
            max_attempts: 1,
            ..Settings::default()
        };
        let mut orch = Orchestrator::new(
            upstream,
            settings,
            HistoryCache::load(Box::new(MemoryStore::default())),
        )
        .with_backoff(Box::new(NoDelay));
        let mut gate = gate();
        assert_eq!(orch.generate("x", &mut gate).await, Outcome::Failed);
        assert!(orch.error().is_some());
        assert_eq!(orch.generate("x", &mut gate).await, Outcome::Applied);
        assert_eq!(orch.error(), None);
    }

    #[test]
    fn test_user_message_keeps_typed_errors() {
        let config: anyhow::Error = ConfigurationError::new("API Key missing").into();
        assert_eq!(
            user_message(&config),
            "Server misconfiguration: API Key missing"
        );
        let rejected: anyhow::Error = VerificationRejected {
            error_codes: vec!["timeout-or-duplicate".to_string()],
        }
        .into();
        assert!(user_message(&rejected).contains("timeout-or-duplicate"));
        let status: anyhow::Error = UpstreamStatusError { status: 502 }.into();
        assert!(user_message(&status).starts_with("Failed to process request with AI service"));
        assert_eq!(
            user_message(&anyhow::anyhow!("connection reset by peer")),
            GENERIC_FAILURE_MESSAGE
        );
    }
}
