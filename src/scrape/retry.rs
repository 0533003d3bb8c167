// src/scrape/retry.rs
//! Bounded exponential-backoff retry for adapter fetches.
//!
//! Two flavors: `retry` re-returns the last error once attempts are
//! exhausted; `retry_response` additionally treats throttling/server status
//! codes as retryable and hands back the final response either way.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;

/// HTTP statuses worth another attempt.
const RETRYABLE_STATUS: &[u16] = &[429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// `min(base * 2^attempt, max)` for attempt 0, 1, 2, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Run `op` up to `max_retries + 1` times, sleeping between attempts.
/// Returns the last error when every attempt fails.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt < policy.max_retries {
                    let delay = policy.delay_for(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "fetch failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.expect("at least one attempt ran"))
}

/// Like `retry`, but a response carrying 429/5xx also counts as retryable.
/// Once retries are exhausted the final response is returned as-is (success
/// or not) so the caller can decide what to do with it.
pub async fn retry_response<F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<reqwest::Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response>>,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        match op().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if RETRYABLE_STATUS.contains(&status) && attempt < policy.max_retries {
                    let delay = policy.delay_for(attempt);
                    tracing::debug!(status, delay_ms = delay.as_millis() as u64, "retryable status");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(resp);
            }
            Err(e) => {
                if attempt < policy.max_retries {
                    let delay = policy.delay_for(attempt);
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.expect("at least one attempt ran"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn delays_double_and_cap() {
        let p = RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(5));
        assert_eq!(p.delay_for(0), Duration::from_secs(2));
        assert_eq!(p.delay_for(1), Duration::from_secs(4));
        assert_eq!(p.delay_for(2), Duration::from_secs(5));
        assert_eq!(p.delay_for(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn always_failing_op_runs_max_retries_plus_one_times() {
        let calls = AtomicU32::new(0);
        let out: Result<()> = retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("boom")) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let out = retry(&fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    fn response_with_status(status: u16) -> reqwest::Response {
        reqwest::Response::from(
            http::Response::builder()
                .status(status)
                .body("body")
                .expect("static response"),
        )
    }

    #[tokio::test]
    async fn persistent_server_error_is_retried_then_returned_as_is() {
        let calls = AtomicU32::new(0);
        let resp = retry_response(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(response_with_status(500)) }
        })
        .await
        .unwrap();
        // Exhausted retries hand back the final response, not an error.
        assert_eq!(resp.status().as_u16(), 500);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn success_after_throttle_short_circuits() {
        let calls = AtomicU32::new(0);
        let resp = retry_response(&fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(response_with_status(if n == 0 { 503 } else { 200 })) }
        })
        .await
        .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_client_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let resp = retry_response(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(response_with_status(404)) }
        })
        .await
        .unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_sequence_is_non_decreasing() {
        let p = RetryPolicy::default();
        let mut prev = Duration::ZERO;
        for attempt in 0..8 {
            let d = p.delay_for(attempt);
            assert!(d >= prev);
            assert!(d <= p.max_delay);
            prev = d;
        }
    }
}
