//! The retry executor: runs a unit of work until it succeeds, fails
//! terminally, or the bounding context expires.
//!
//! ```text
//!              ┌──────────── RetryableFailure, budget left ───────────┐
//!              │              (sleep backoff(n), n += 1)              │
//!              ▼                                                      │
//!   start ─▶ Attempting ── Success ──────────▶ Done(value)            │
//!              │   │                                                  │
//!              │   └────── TerminalFailure ──▶ Done(error)            │
//!              │                                                      │
//!              ├───────── RetryableFailure, retries used up ──▶ Aborted(last error)
//!              │
//!              └───────── RetryableFailure, context expired ──▶ Aborted(last error)
//! ```
//!
//! Both blocking points, the attempt itself and the backoff sleep, are raced
//! against the context so a host-level cancellation unblocks promptly.

use std::future::Future;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{Attempt, BoundedContext, OperationOutcome, RetryError, RetryPolicy};

/// A retriable piece of work.
///
/// Each call to [`UnitOfWork::attempt`] is one try; the returned outcome tells
/// the executor whether to stop or go again. Closures returning an owned
/// future implement this trait directly.
#[async_trait]
pub trait UnitOfWork: Send {
    type Output: Send;
    type Error: Send + std::fmt::Display;

    async fn attempt(&mut self, attempt: &Attempt) -> OperationOutcome<Self::Output, Self::Error>;
}

#[async_trait]
impl<F, Fut, T, E> UnitOfWork for F
where
    F: FnMut(Attempt) -> Fut + Send,
    Fut: Future<Output = OperationOutcome<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + std::fmt::Display + 'static,
{
    type Output = T;
    type Error = E;

    async fn attempt(&mut self, attempt: &Attempt) -> OperationOutcome<T, E> {
        (self)(*attempt).await
    }
}

// ---------------------------------------------------------------------------

/// Drives a [`UnitOfWork`] under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `work` until it succeeds, fails terminally, runs out of retries,
    /// or time runs out.
    ///
    /// The effective deadline is the earlier of `ctx`'s deadline and the
    /// policy's operation timeout. The context is only consulted after a
    /// retryable failure (or while an attempt or a backoff sleep is pending),
    /// so a terminal failure always ends the loop after exactly the attempt
    /// that produced it.
    pub async fn run<W>(
        &self,
        ctx: &BoundedContext,
        work: &mut W,
    ) -> Result<W::Output, RetryError<W::Error>>
    where
        W: UnitOfWork + ?Sized,
    {
        let (ctx, _release) = ctx.with_timeout(self.policy.operation_timeout());
        let started = Instant::now();
        let mut last: Option<W::Error> = None;
        let mut index: u32 = 0;

        loop {
            let attempt = Attempt::start(index);
            debug!(attempt = index + 1, "attempting");

            let outcome = tokio::select! {
                biased;
                outcome = work.attempt(&attempt) => outcome,
                _ = ctx.done() => {
                    return Err(exhausted(index, started, last));
                }
            };

            let error = match outcome {
                OperationOutcome::Success(value) => {
                    debug!(attempt = index + 1, "attempt succeeded");
                    return Ok(value);
                }
                OperationOutcome::TerminalFailure(error) => {
                    debug!(attempt = index + 1, %error, "attempt failed terminally");
                    return Err(RetryError::Terminal {
                        attempts: index + 1,
                        error,
                    });
                }
                OperationOutcome::RetryableFailure(error) => error,
            };

            let completed = index + 1;
            if self.policy.max_retries().is_some_and(|max| index >= max) {
                warn!(attempt = completed, %error, "retryable failure with no retries left");
                return Err(RetryError::AttemptsExhausted {
                    attempts: completed,
                    last: error,
                });
            }

            let delay = self.policy.delay_for_attempt(index);

            if ctx.is_done() || ctx.remaining().is_some_and(|left| left < delay) {
                warn!(
                    attempt = completed,
                    %error,
                    "retryable failure with no time left for another attempt"
                );
                return Err(RetryError::TimeoutExhausted {
                    attempts: completed,
                    elapsed: started.elapsed(),
                    last: error,
                });
            }

            warn!(
                attempt = completed,
                %error,
                next_delay = ?delay,
                "retryable failure, backing off"
            );
            last = Some(error);

            tokio::select! {
                biased;
                _ = ctx.done() => {
                    return Err(exhausted(completed, started, last));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            index = completed;
        }
    }
}

fn exhausted<E>(attempts: u32, started: Instant, last: Option<E>) -> RetryError<E> {
    let elapsed = started.elapsed();
    match last {
        Some(last) => RetryError::TimeoutExhausted {
            attempts,
            elapsed,
            last,
        },
        None => RetryError::Interrupted { elapsed },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ApiError;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn policy(timeout_secs: u64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(8),
            Duration::from_secs(timeout_secs),
        )
        .unwrap()
    }

    /// Fails retryably `failures` times, then succeeds with the attempt index.
    fn flaky(calls: Arc<AtomicU32>, failures: u32) -> impl UnitOfWork<Output = u32, Error = ApiError> {
        move |attempt: Attempt| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt.index < failures {
                    OperationOutcome::RetryableFailure(ApiError::status(503, "unavailable"))
                } else {
                    OperationOutcome::Success(attempt.index)
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success_without_sleeping() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let value = RetryExecutor::new(policy(60))
            .run(&BoundedContext::background(), &mut flaky(Arc::clone(&calls), 0))
            .await
            .unwrap();

        assert_eq!(value, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let value = RetryExecutor::new(policy(60))
            .run(&BoundedContext::background(), &mut flaky(Arc::clone(&calls), 3))
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff.
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_stops_after_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut work = move |_attempt: Attempt| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                OperationOutcome::<(), _>::TerminalFailure(ApiError::status(403, "forbidden"))
            }
        };

        let err = RetryExecutor::new(policy(3_600))
            .run(&BoundedContext::background(), &mut work)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!err.is_timeout());
        assert_eq!(err.attempts(), 1);
        assert_eq!(err.into_last_error(), Some(ApiError::status(403, "forbidden")));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_is_reported_even_with_an_expired_context() {
        let (ctx, _handle) = BoundedContext::background().with_timeout(Duration::ZERO);
        let mut work = |_attempt: Attempt| async {
            OperationOutcome::<(), _>::TerminalFailure(ApiError::construction("missing name"))
        };

        let err = RetryExecutor::new(policy(60)).run(&ctx, &mut work).await.unwrap_err();
        assert!(matches!(err, RetryError::Terminal { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_retryable_failure_exhausts_the_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let err = RetryExecutor::new(policy(10))
            .run(&BoundedContext::background(), &mut flaky(Arc::clone(&calls), u32::MAX))
            .await
            .unwrap_err();

        // Attempts at t=0, 1, 3, 7; the next delay (8s) would overshoot t=10.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(err.is_timeout());
        match err {
            RetryError::TimeoutExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 4);
                assert_eq!(last, ApiError::status(503, "unavailable"));
            }
            other => panic!("expected timeout exhaustion, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_cap_stops_before_the_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let err = RetryExecutor::new(policy(3_600).with_max_retries(2))
            .run(&BoundedContext::background(), &mut flaky(Arc::clone(&calls), u32::MAX))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!err.is_timeout());
        match err {
            RetryError::AttemptsExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, ApiError::status(503, "unavailable"));
            }
            other => panic!("expected the retry cap, got {other:?}"),
        }
        // 1s + 2s of backoff; no sleep after the final attempt.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_the_last_allowed_retry_is_kept() {
        let calls = Arc::new(AtomicU32::new(0));
        let value = RetryExecutor::new(policy(3_600).with_max_retries(2))
            .run(&BoundedContext::background(), &mut flaky(Arc::clone(&calls), 2))
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_deadline_wins_over_policy_timeout() {
        let (ctx, _handle) = BoundedContext::background().with_timeout(Duration::from_secs(2));
        let calls = Arc::new(AtomicU32::new(0));

        let err = RetryExecutor::new(policy(3_600))
            .run(&ctx, &mut flaky(Arc::clone(&calls), u32::MAX))
            .await
            .unwrap_err();

        // t=0 fails, sleeps 1s; t=1 fails, 2s delay exceeds the 1s left.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_aborts_promptly() {
        let root = BoundedContext::background();
        let (ctx, handle) = root.with_timeout(Duration::from_secs(3_600));
        let slow = RetryPolicy::new(
            Duration::from_secs(600),
            1.0,
            Duration::from_secs(600),
            Duration::from_secs(3_600),
        )
        .unwrap();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            handle.cancel();
        });

        let start = Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let err = RetryExecutor::new(slow)
            .run(&ctx, &mut flaky(Arc::clone(&calls), u32::MAX))
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(matches!(err, RetryError::TimeoutExhausted { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_first_attempt_is_interrupted() {
        let (ctx, _handle) = BoundedContext::background().with_timeout(Duration::from_secs(5));
        let mut work = |_attempt: Attempt| async {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            OperationOutcome::<(), ApiError>::Success(())
        };

        let err = RetryExecutor::new(policy(60)).run(&ctx, &mut work).await.unwrap_err();
        assert!(matches!(err, RetryError::Interrupted { .. }));
        assert!(err.is_timeout());
    }

    struct Countdown {
        remaining: u32,
    }

    #[async_trait]
    impl UnitOfWork for Countdown {
        type Output = &'static str;
        type Error = ApiError;

        async fn attempt(&mut self, _attempt: &Attempt) -> OperationOutcome<&'static str, ApiError> {
            if self.remaining == 0 {
                return OperationOutcome::Success("ready");
            }
            self.remaining -= 1;
            OperationOutcome::RetryableFailure(ApiError::transport("connection reset"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn trait_implementations_can_carry_state_between_attempts() {
        let mut work = Countdown { remaining: 2 };
        let value = RetryExecutor::new(policy(60))
            .run(&BoundedContext::background(), &mut work)
            .await
            .unwrap();
        assert_eq!(value, "ready");
    }
}
