//! Retry policy for retryable errors: exponential backoff with jitter.
//!
//! Applies only to errors whose `retryable` flag is set (the `NET_*` and
//! `TIMEOUT_OPERATION` families by default); everything else propagates on
//! the first attempt.

use std::hash::{BuildHasher, Hash, Hasher};
use std::time::Duration;

use crate::error::{HubError, HubResult};

/// Exponential backoff: `initial * 2^(attempt-1)`, capped, with ±`jitter`
/// proportional noise.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub cap: Duration,
    /// Proportional jitter in [0,1]; 0.25 means ±25%.
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.25,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (attempt is 1-based: the delay after the
    /// first failure is `delay(1)`).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let base = self
            .initial
            .saturating_mul(1u32 << exp.min(16))
            .min(self.cap);
        let base_ms = base.as_millis() as f64;
        // Seeded-per-process hash as the noise source; enough for jitter,
        // avoids pulling in a rng crate.
        let mut hasher = std::collections::hash_map::RandomState::new().build_hasher();
        attempt.hash(&mut hasher);
        let unit = (hasher.finish() % 10_000) as f64 / 10_000.0; // [0,1)
        let factor = 1.0 + self.jitter * (2.0 * unit - 1.0);
        Duration::from_millis((base_ms * factor).max(0.0) as u64)
    }

    /// True when one more attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32, err: &HubError) -> bool {
        err.retryable && attempt < self.max_attempts
    }
}

/// Runs `op` up to `policy.max_attempts` times, sleeping the backoff delay
/// between retryable failures. The closure receives the 1-based attempt number.
pub async fn retry_with<T, F, Fut>(policy: RetryPolicy, mut op: F) -> HubResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = HubResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(err) if policy.should_retry(attempt, &err) => {
                let delay = policy.delay(attempt);
                tracing::debug!(attempt, ?delay, code = %err.code, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_and_stays_within_jitter_bounds() {
        let p = RetryPolicy::default();
        for attempt in 1..=6 {
            let nominal = (1000u64 << (attempt - 1)).min(30_000) as f64;
            let d = p.delay(attempt).as_millis() as f64;
            assert!(d >= nominal * 0.75 - 1.0, "attempt {attempt}: {d} < lower bound");
            assert!(d <= nominal * 1.25 + 1.0, "attempt {attempt}: {d} > upper bound");
        }
    }

    #[test]
    fn delay_is_capped() {
        let p = RetryPolicy::default();
        assert!(p.delay(30).as_millis() as f64 <= 30_000.0 * 1.25 + 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_until_success() {
        let calls = AtomicU32::new(0);
        let out = retry_with(RetryPolicy::default(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(HubError::new(ErrorCode::NetUpstream, "flaky"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let out: HubResult<()> = retry_with(RetryPolicy::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HubError::new(ErrorCode::ValidInput, "bad input")) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let out: HubResult<()> = retry_with(RetryPolicy::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HubError::new(ErrorCode::TimeoutOperation, "slow")) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
