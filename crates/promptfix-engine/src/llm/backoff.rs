//! Retrying call wrapper.
//!
//! Every failure is retried until the attempt budget runs out; the final
//! failure is returned unchanged. Waits suspend only the calling task.

use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Documented schedule: 1s, 2s, 4s, 8s, 16s.
pub const DEFAULT_SCHEDULE_MS: [u64; 5] = [1_000, 2_000, 4_000, 8_000, 16_000];

/// Maps a failed attempt number (0-based) to the wait before the next one.
pub trait BackoffPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Fixed delay table indexed by attempt, clamped to its last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSchedule {
    steps: Vec<Duration>,
}

impl FixedSchedule {
    pub fn new(steps: Vec<Duration>) -> Self {
        Self { steps }
    }
}

impl Default for FixedSchedule {
    fn default() -> Self {
        Self::new(
            DEFAULT_SCHEDULE_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }
}

impl BackoffPolicy for FixedSchedule {
    fn delay(&self, attempt: u32) -> Duration {
        let Some(last) = self.steps.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let idx = (attempt as usize).min(last);
        self.steps[idx]
    }
}

/// Retry immediately. Used by tests and scripted runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl BackoffPolicy for NoDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Run `operation` up to `max_attempts` times (at least once), sleeping per
/// `policy` between failures.
pub async fn call_with_backoff<T, F, Fut, P>(
    policy: &P,
    max_attempts: u32,
    mut operation: F,
) -> anyhow::Result<T>
where
    P: BackoffPolicy + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= max_attempts {
                    tracing::warn!(attempts = max_attempts, "retry budget exhausted: {}", err);
                    return Err(err);
                }
                let wait = policy.delay(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = wait.as_millis() as u64,
                    "upstream call failed, retrying: {}",
                    err
                );
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                attempt += 1;
            }
        }
    }
}
