//! Bounded retry with exponential backoff and jitter for idempotent model calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::parse_env;
use crate::error::{ConfigError, LlmError};

/// Retry policy for idempotent reads (routing, consolidation, answering).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Add up to 100% random jitter on top of the computed delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(20),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_attempts: parse_env("LEAD_ASSIST_RETRY_ATTEMPTS", defaults.max_attempts)?.max(1),
            initial_backoff: Duration::from_millis(parse_env(
                "LEAD_ASSIST_RETRY_BACKOFF_MS",
                defaults.initial_backoff.as_millis() as u64,
            )?),
            ..defaults
        })
    }

    /// No retries, no waiting. Used in tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before attempt number `attempt` (1-based; attempt 1 has no delay).
    pub fn delay_for(&self, attempt: u32, error: &LlmError) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        if let LlmError::RateLimited {
            retry_after: Some(after),
            ..
        } = error
        {
            return (*after).min(self.max_backoff);
        }
        let exponent = (attempt - 2).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
        (base + Duration::from_millis(jitter_ms)).min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts are exhausted.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, op_name: &str, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                attempt += 1;
                let delay = config.delay_for(attempt, &e);
                tracing::warn!(
                    op = op_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Model call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > 1 {
                    tracing::error!(op = op_name, attempts = attempt, error = %e, "Model call failed after retries");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn transient() -> LlmError {
        LlmError::RequestFailed {
            provider: "test".into(),
            reason: "503".into(),
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter: true,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = with_retry(&fast(), "test", || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = with_retry(&fast(), "test", || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = with_retry(&fast(), "test", || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::AuthFailed {
                    provider: "test".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            jitter: false,
        };
        let e = transient();
        assert_eq!(config.delay_for(1, &e), Duration::ZERO);
        assert_eq!(config.delay_for(2, &e), Duration::from_millis(100));
        assert_eq!(config.delay_for(3, &e), Duration::from_millis(200));
        assert_eq!(config.delay_for(4, &e), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            jitter: true,
        };
        for _ in 0..50 {
            let delay = config.delay_for(2, &transient());
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn rate_limit_hint_overrides_backoff() {
        let config = RetryConfig::default();
        let e = LlmError::RateLimited {
            provider: "test".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(config.delay_for(2, &e), Duration::from_secs(3));
    }
}
