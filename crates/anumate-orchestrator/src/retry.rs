//! Retry with exponential backoff and jitter
//!
//! Only retryable failures of retry-safe calls are retried: transport
//! errors and timeouts, and only when the step is idempotent or the tool
//! protocol received an idempotency key to deduplicate on its side.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use anumate_types::RetryPolicy;

use crate::{ToolError, ToolResult};

/// Compute the backoff delay before `attempt` (1-based, the first retry is
/// attempt 1)
pub fn backoff_delay<R: Rng>(rng: &mut R, policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy
        .base_delay_ms
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(20));
    let capped = exp.min(policy.max_delay_ms) as f64;
    let jitter_span = capped * policy.jitter_ratio.clamp(0.0, 1.0);
    let jitter = if jitter_span > 0.0 {
        rng.gen_range(-jitter_span..=jitter_span)
    } else {
        0.0
    };
    Duration::from_millis((capped + jitter).max(0.0) as u64)
}

/// Whether a failed call may be retried at all
pub fn may_retry(error: &ToolError, step_idempotent: bool, idempotency_key_passed: bool) -> bool {
    error.is_retryable() && (step_idempotent || idempotency_key_passed)
}

/// Run `op` with retries per `policy`.
///
/// `retry_safe` captures whether the underlying call tolerates re-execution
/// (idempotent step, or an idempotency key travelled with the call).
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    retry_safe: bool,
    mut op: F,
) -> ToolResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ToolResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if attempt >= policy.max_attempts
                    || !error.is_retryable()
                    || !retry_safe
                {
                    return Err(error);
                }
                let delay = {
                    let mut rng = rand::thread_rng();
                    backoff_delay(&mut rng, policy, attempt)
                };
                tracing::debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying tool call"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
            jitter_ratio: 0.0,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
            jitter_ratio: 0.0,
        };
        assert_eq!(backoff_delay(&mut rng, &p, 1).as_millis(), 100);
        assert_eq!(backoff_delay(&mut rng, &p, 2).as_millis(), 200);
        assert_eq!(backoff_delay(&mut rng, &p, 3).as_millis(), 350);
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ratio: 0.2,
        };
        for _ in 0..100 {
            let delay = backoff_delay(&mut rng, &p, 1).as_millis() as i64;
            assert!((80..=120).contains(&delay), "delay {delay} out of band");
        }
    }

    #[test]
    fn test_non_idempotent_never_retries() {
        let transport = ToolError::Transport("x".into());
        assert!(!may_retry(&transport, false, false));
        assert!(may_retry(&transport, false, true));
        assert!(may_retry(&transport, true, false));
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let count = AtomicU32::new(0);
        let result = with_retry(&policy(), true, || {
            let n = count.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ToolError::Transport("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_attempts() {
        let count = AtomicU32::new(0);
        let result: ToolResult<()> = with_retry(&policy(), true, || {
            count.fetch_add(1, Ordering::SeqCst);
            async { Err(ToolError::Transport("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let count = AtomicU32::new(0);
        let result: ToolResult<()> = with_retry(&policy(), true, || {
            count.fetch_add(1, Ordering::SeqCst);
            async { Err(ToolError::Rejected("no".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsafe_call_is_not_retried() {
        let count = AtomicU32::new(0);
        let result: ToolResult<()> = with_retry(&policy(), false, || {
            count.fetch_add(1, Ordering::SeqCst);
            async { Err(ToolError::Transport("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
