//! Retry / fallback executor.
//!
//! Wraps one agent invocation. The error's code decides the move: retryable
//! codes loop with capped, jittered exponential backoff; `unauthorized`
//! skips; `content_too_large` returns partial; everything else surfaces.
//! Backoff sleeps select against the ambient cancellation token, so a
//! cancelled context aborts without serving out the remaining delay.

use cicd_core::error::{Error, Fallback, Result};
use cicd_core::observe::Metrics;
use cicd_core::protocol::InvocationResult;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total invocations = max_retries + 1.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped and jittered by
    /// up to 10%.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64) as u64;
        let mut hasher = DefaultHasher::new();
        attempt.hash(&mut hasher);
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos()
            .hash(&mut hasher);
        let jitter = if capped == 0 {
            0
        } else {
            hasher.finish() % (capped / 10).max(1)
        };
        Duration::from_millis(capped + jitter)
    }
}

pub struct RetryExecutor {
    policy: RetryPolicy,
    metrics: Arc<dyn Metrics>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, metrics: Arc<dyn Metrics>) -> Self {
        Self { policy, metrics }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive `attempt` to a terminal [`InvocationResult`]. The closure gets
    /// the 0-based attempt index; `result.retries` records how many retries
    /// actually ran.
    pub async fn execute<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> InvocationResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<InvocationResult>>,
    {
        let max_attempts = self.policy.max_retries + 1;
        let started = std::time::Instant::now();

        for index in 0..max_attempts {
            if cancel.is_cancelled() {
                return self.finish(cancelled_result(index), started);
            }

            let error = match attempt(index).await {
                Ok(mut result) => {
                    result.retries = index;
                    return self.finish(result, started);
                }
                Err(Error::Cancelled) => {
                    return self.finish(cancelled_result(index), started);
                }
                Err(e) => e,
            };

            let code = error.code();
            match code.fallback() {
                Fallback::Retry if index + 1 < max_attempts => {
                    let delay = self.policy.delay_for(index);
                    debug!(code = %code, attempt = index, delay_ms = delay.as_millis() as u64,
                           "retryable failure, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return self.finish(cancelled_result(index), started);
                        }
                    }
                }
                Fallback::Retry => {
                    // Retries exhausted.
                    warn!(code = %code, attempts = max_attempts, "agent error after exhausted retries");
                    self.count_fallback("exhausted", code.as_str());
                    let result = InvocationResult {
                        retries: index,
                        error: Some(error),
                        ..Default::default()
                    };
                    return self.finish(result, started);
                }
                Fallback::Skip => {
                    debug!(code = %code, "skipping invocation");
                    self.count_fallback("skip", code.as_str());
                    let mut result =
                        InvocationResult::skipped(format!("{code}: {error}"));
                    result.retries = index;
                    result.error = Some(error);
                    return self.finish(result, started);
                }
                Fallback::Partial => {
                    debug!(code = %code, "returning partial result");
                    self.count_fallback("partial", code.as_str());
                    let result = InvocationResult {
                        retries: index,
                        partial: true,
                        error: Some(error),
                        ..Default::default()
                    };
                    return self.finish(result, started);
                }
                Fallback::Fatal => {
                    self.count_fallback("fatal", code.as_str());
                    let result = InvocationResult {
                        retries: index,
                        error: Some(error),
                        ..Default::default()
                    };
                    return self.finish(result, started);
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    fn count_fallback(&self, kind: &str, code: &str) {
        self.metrics.incr("runner.fallback.total");
        self.metrics.incr(&format!("runner.fallback.{kind}"));
        self.metrics.incr(&format!("runner.fallback.code.{code}"));
    }

    fn finish(&self, mut result: InvocationResult, started: std::time::Instant) -> InvocationResult {
        if result.duration == Duration::default() {
            result.duration = started.elapsed();
        }
        result
    }
}

fn cancelled_result(retries: u32) -> InvocationResult {
    InvocationResult {
        retries,
        error: Some(Error::Cancelled),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cicd_core::observe::{NoopMetrics, RecordingMetrics};
    use cicd_core::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(
            RetryPolicy::with_max_retries(max_retries),
            Arc::new(NoopMetrics),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_pattern_invokes_max_retries_plus_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let cancel = CancellationToken::new();
        let result = executor(3)
            .execute(&cancel, move |_i| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Timeout("deadline exceeded".into()))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.retries, 3);
        assert_eq!(result.error.as_ref().unwrap().code(), ErrorCode::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_then_success_records_retry_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let cancel = CancellationToken::new();
        let result = executor(3)
            .execute(&cancel, move |_i| {
                let calls = calls_in.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(Error::Timeout("timeout".into()))
                    } else {
                        Ok(InvocationResult::default())
                    }
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.retries, 2);
        assert!(result.error.is_none());
        assert!(!result.skipped);
    }

    #[tokio::test]
    async fn unauthorized_invokes_exactly_once_and_skips() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let cancel = CancellationToken::new();
        let result = executor(3)
            .execute(&cancel, move |_i| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Unauthorized("401 unauthorized".into()))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.skipped);
        assert!(result.skip_reason.as_ref().unwrap().contains("unauthorized"));
        assert!(result.findings.is_empty());
    }

    #[tokio::test]
    async fn content_too_large_is_partial_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let cancel = CancellationToken::new();
        let result = executor(3)
            .execute(&cancel, move |_i| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::ContentTooLarge("context length exceeded".into()))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.partial);
    }

    #[tokio::test]
    async fn agent_not_found_is_fatal_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let cancel = CancellationToken::new();
        let result = executor(5)
            .execute(&cancel, move |_i| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::AgentNotFound("claude".into()))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.error.as_ref().unwrap().code(),
            ErrorCode::AgentNotFound
        );
        assert!(!result.skipped && !result.partial);
    }

    #[tokio::test]
    async fn cancellation_mid_backoff_returns_promptly() {
        let cancel = CancellationToken::new();
        let cancel_in = cancel.clone();
        let started = std::time::Instant::now();
        // Real time on purpose: the 1s backoff must NOT be served out.
        let result = executor(3)
            .execute(&cancel, move |_i| {
                let cancel = cancel_in.clone();
                async move {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        cancel.cancel();
                    });
                    Err(Error::ServerError("503".into()))
                }
            })
            .await;
        assert!(started.elapsed() < Duration::from_millis(700), "slept through backoff");
        assert_eq!(result.error.as_ref().unwrap().code(), ErrorCode::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_counters_published() {
        let metrics = Arc::new(RecordingMetrics::new());
        let executor = RetryExecutor::new(
            RetryPolicy::with_max_retries(0),
            metrics.clone(),
        );
        let cancel = CancellationToken::new();
        executor
            .execute(&cancel, |_i| async {
                Err(Error::Unauthorized("401".into()))
            })
            .await;
        assert_eq!(metrics.counter("runner.fallback.total"), 1);
        assert_eq!(metrics.counter("runner.fallback.skip"), 1);
        assert_eq!(metrics.counter("runner.fallback.code.unauthorized"), 1);
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        let d0 = policy.delay_for(0);
        let d2 = policy.delay_for(2);
        let d9 = policy.delay_for(9);
        assert!(d0 >= Duration::from_secs(1));
        assert!(d2 >= Duration::from_secs(4));
        // Cap plus at most 10% jitter
        assert!(d9 <= Duration::from_millis(11_000));
    }
}
