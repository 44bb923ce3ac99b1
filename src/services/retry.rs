// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bounded exponential backoff shared by the sync queue and direct writes.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Retry ceiling and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// `base_delay * 2^retry_count`, saturating instead of overflowing.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether `retry_count` failures exhaust the policy.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_attempts
    }
}

/// Run `attempt` until it succeeds, fails permanently or exhausts the policy.
///
/// Only transient errors are retried. The attempt number (starting at 0) is
/// passed to the closure.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry_count = 0;
    loop {
        match attempt(retry_count).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                retry_count += 1;
                if policy.is_exhausted(retry_count) {
                    tracing::warn!(label, attempts = retry_count, error = %e, "Retries exhausted");
                    return Err(e);
                }
                let delay = policy.backoff(retry_count);
                tracing::debug!(
                    label,
                    attempt = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Wrap a terminal transient failure as `RetryExhausted`.
pub fn exhausted(operation_id: &str, attempts: u32, err: &AppError) -> AppError {
    AppError::RetryExhausted {
        operation_id: operation_id.to_string(),
        attempts,
        last_error: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(4), Duration::from_millis(8000));
        assert!(policy.backoff(200) >= policy.backoff(31));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&RetryPolicy::default(), "test", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::WriteFailed("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(&RetryPolicy::default(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::WriteFailed("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(&RetryPolicy::default(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::BadRequest("bad".into())) }
        })
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
