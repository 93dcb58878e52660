use std::future::Future;
use std::time::Duration;

use crate::config::RetrySection;
use crate::errors::TrackerError;

/// Bounded exponential backoff for tracker calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySection::default())
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            base_backoff: Duration::from_millis(section.base_backoff_ms),
            max_backoff: Duration::from_millis(section.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; for tests and simulation.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails permanently or attempts run out.
///
/// A rate limit's `retry_after` hint wins over the computed delay when it is
/// longer. The last error is returned after exhaustion.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, TrackerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TrackerError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let mut delay = policy.delay_for_attempt(attempt);
                if let TrackerError::RateLimited {
                    retry_after: Some(hint),
                } = &err
                {
                    delay = delay.max(*hint).min(policy.max_backoff.max(*hint));
                }
                tracing::debug!(
                    op = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying tracker call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::warn!(op = label, attempts = attempt, error = %err, "Giving up on tracker call");
                }
                return Err(err);
            }
        }
    }
}
