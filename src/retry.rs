//! Retry policy for a single page fetch.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries); default 5.
//! - The `should_retry` predicate decides whether a failure is worth another attempt. The default
//!   retries [`ErrorClass::TransientRateLimit`] only; everything else fails on the spot.
//! - The wait after failed attempt `n` is `min(jitter(backoff(n)), max_delay)`. With defaults that
//!   is `min(2^n + U[0,1), 60)` seconds. Jitter is drawn fresh for every wait.
//! - Terminal errors (rejected, exhausted, interrupted) are returned exactly as the operation
//!   produced them. There is no wrapper type, so callers classify the error itself.
//! - Every decision is reported to the observer.
//!
//! Invariants:
//! - Attempts never exceed `max_attempts`.
//! - Nothing waits before the first attempt; at most `max_attempts - 1` waits happen.
//!
//! Example
//! ```rust
//! use iam_harvest::{Classify, ErrorClass, InstantSleeper, RetryPolicy};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("too many requests")]
//! struct RateLimited;
//! impl Classify for RateLimited {
//!     fn class(&self) -> ErrorClass { ErrorClass::TransientRateLimit }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<RateLimited>::builder()
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let result: Result<(), RateLimited> = policy.execute(|| async { Err(RateLimited) }).await;
//! assert!(result.is_err());
//! # });
//! ```

use crate::cancel::Cancellation;
use crate::error::{BuildError, Classify};
use crate::jitter::{Jitter, JitterSource, ThreadRngSource};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{HarvestEvent, LogObserver, Observer, RetryEvent, SharedObserver};
use crate::Backoff;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Total attempts (1 initial + 4 retries).
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Hard cap on any single wait.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// How a retried operation ended without a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStop<E> {
    /// The predicate rejected the error or every attempt was used.
    Failed(E),
    /// Cancellation fired before the next attempt; carries the error that caused the wait.
    Interrupted(E),
}

impl<E> RetryStop<E> {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, RetryStop::Interrupted(_))
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryStop::Failed(err) | RetryStop::Interrupted(err) => err,
        }
    }
}

/// Retry policy combining backoff, jitter, predicate, sleeper, and observer.
pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    max_delay: Duration,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    jitter_source: Arc<dyn JitterSource>,
    sleeper: Arc<dyn Sleeper>,
    observer: SharedObserver,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            max_delay: self.max_delay,
            should_retry: self.should_retry.clone(),
            jitter_source: self.jitter_source.clone(),
            sleeper: self.sleeper.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("max_delay", &self.max_delay)
            .field("jitter_source", &self.jitter_source)
            .field("sleeper", &self.sleeper)
            .field("should_retry", &"<predicate>")
            .field("observer", &"<observer>")
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Wait after failed attempt `attempt` (1-indexed), with a fresh jitter draw.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.backoff.delay(attempt);
        self.jitter.apply(base, self.jitter_source.as_ref()).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, E>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        self.execute_with_cancel(operation, &Cancellation::never()).await
    }

    /// Like [`execute`](Self::execute), but a backoff wait ends early when `cancel` fires. The
    /// error that caused the wait is then returned unchanged and no further attempt starts.
    pub async fn execute_with_cancel<T, Fut, Op>(
        &self,
        operation: Op,
        cancel: &Cancellation,
    ) -> Result<T, E>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        self.execute_until_cancelled(operation, cancel).await.map_err(RetryStop::into_inner)
    }

    /// Like [`execute_with_cancel`](Self::execute_with_cancel), but reports whether the run
    /// stopped on its own error or because cancellation cut a backoff wait short.
    pub async fn execute_until_cancelled<T, Fut, Op>(
        &self,
        mut operation: Op,
        cancel: &Cancellation,
    ) -> Result<T, RetryStop<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !(self.should_retry)(&err) {
                self.emit(RetryEvent::Rejected {
                    attempt,
                    class: err.class(),
                    error: err.to_string(),
                });
                return Err(RetryStop::Failed(err));
            }

            if attempt >= self.max_attempts {
                self.emit(RetryEvent::Exhausted { attempts: attempt, error: err.to_string() });
                return Err(RetryStop::Failed(err));
            }

            let delay = self.delay_for(attempt);
            self.emit(RetryEvent::Scheduled { attempt, delay, error: err.to_string() });

            if cancel.is_cancelled() {
                self.emit(RetryEvent::Interrupted { attempt, error: err.to_string() });
                return Err(RetryStop::Interrupted(err));
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.emit(RetryEvent::Interrupted { attempt, error: err.to_string() });
                    return Err(RetryStop::Interrupted(err));
                }
                _ = self.sleeper.sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    fn emit(&self, event: RetryEvent) {
        self.observer.observe(&HarvestEvent::Retry(event));
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    max_delay: Duration,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    jitter_source: Arc<dyn JitterSource>,
    sleeper: Arc<dyn Sleeper>,
    observer: SharedObserver,
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    /// Defaults: 5 attempts, `2^n` s backoff, up to 1 s additive jitter, 60 s cap, retry on
    /// rate limiting only.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            jitter: Jitter::default(),
            max_delay: DEFAULT_MAX_DELAY,
            should_retry: Arc::new(|e: &E| e.class().is_transient()),
            jitter_source: Arc::new(ThreadRngSource),
            sleeper: Arc::new(TokioSleeper),
            observer: Arc::new(LogObserver),
        }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Cap applied after jitter.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Replace the retryable-error predicate.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_jitter_source<J>(mut self, source: J) -> Self
    where
        J: JitterSource + 'static,
    {
        self.jitter_source = Arc::new(source);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: Observer + 'static,
    {
        self.observer = Arc::new(observer);
        self
    }

    /// Share an observer that is already behind an `Arc`.
    pub fn with_shared_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Build the retry policy, validating inputs.
    pub fn build(self) -> Result<RetryPolicy<E>, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            max_delay: self.max_delay,
            should_retry: self.should_retry,
            jitter_source: self.jitter_source,
            sleeper: self.sleeper,
            observer: self.observer,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::jitter::{FixedSource, SeededSource};
    use crate::sleeper::{InstantSleeper, RecordingSleeper};
    use crate::telemetry::MemoryObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("{class} failure on attempt {attempt}")]
    struct TestError {
        class: ErrorClass,
        attempt: usize,
    }

    impl TestError {
        fn rate_limited(attempt: usize) -> Self {
            Self { class: ErrorClass::TransientRateLimit, attempt }
        }

        fn permanent(attempt: usize) -> Self {
            Self { class: ErrorClass::Permanent, attempt }
        }
    }

    impl Classify for TestError {
        fn class(&self) -> ErrorClass {
            self.class
        }
    }

    fn policy_with(sleeper: RecordingSleeper, observer: MemoryObserver) -> RetryPolicy<TestError> {
        RetryPolicy::builder()
            .with_sleeper(sleeper)
            .with_observer(observer)
            .with_jitter_source(FixedSource::new(0.5))
            .build()
            .expect("builder")
    }

    #[tokio::test]
    async fn success_first_attempt_never_sleeps() {
        let sleeper = RecordingSleeper::new();
        let observer = MemoryObserver::new();
        let policy = policy_with(sleeper.clone(), observer.clone());
        let calls = AtomicUsize::new(0);

        let result = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, TestError>(42) }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.count(), 0);
        assert!(observer.is_empty());
    }

    #[tokio::test]
    async fn succeeds_on_fifth_attempt_after_four_rate_limits() {
        let sleeper = RecordingSleeper::new();
        let observer = MemoryObserver::new();
        let policy = policy_with(sleeper.clone(), observer.clone());
        let calls = AtomicUsize::new(0);

        let result = policy
            .execute(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt < 5 {
                        Err(TestError::rate_limited(attempt))
                    } else {
                        Ok("page")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("page"));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // Waits gate attempts 2..=5 only: 2^n + 0.5 for n = 1..=4.
        assert_eq!(
            sleeper.delays(),
            vec![
                Duration::from_millis(2500),
                Duration::from_millis(4500),
                Duration::from_millis(8500),
                Duration::from_millis(16500),
            ]
        );
        let scheduled = observer
            .retry_events()
            .into_iter()
            .filter(|e| matches!(e, RetryEvent::Scheduled { .. }))
            .count();
        assert_eq!(scheduled, 4);
    }

    #[tokio::test]
    async fn exhaustion_returns_the_original_error() {
        let sleeper = RecordingSleeper::new();
        let observer = MemoryObserver::new();
        let policy = policy_with(sleeper.clone(), observer.clone());
        let calls = AtomicUsize::new(0);

        let result: Result<(), TestError> = policy
            .execute(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(TestError::rate_limited(attempt)) }
            })
            .await;

        assert_eq!(result, Err(TestError::rate_limited(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(sleeper.count(), 4);
        assert_eq!(
            observer.retry_events().last(),
            Some(&RetryEvent::Exhausted {
                attempts: 5,
                error: "transient-rate-limit failure on attempt 5".into()
            })
        );
    }

    #[tokio::test]
    async fn permanent_error_fails_immediately() {
        let sleeper = RecordingSleeper::new();
        let observer = MemoryObserver::new();
        let policy = policy_with(sleeper.clone(), observer.clone());
        let calls = AtomicUsize::new(0);

        let result: Result<(), TestError> = policy
            .execute(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(TestError::permanent(attempt)) }
            })
            .await;

        assert_eq!(result, Err(TestError::permanent(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.count(), 0, "no delay before propagating");
        assert!(matches!(
            observer.retry_events().as_slice(),
            [RetryEvent::Rejected { attempt: 1, class: ErrorClass::Permanent, .. }]
        ));
    }

    #[tokio::test]
    async fn permanent_after_transient_stops_retrying() {
        let sleeper = RecordingSleeper::new();
        let policy = policy_with(sleeper.clone(), MemoryObserver::new());
        let calls = AtomicUsize::new(0);

        let result: Result<(), TestError> = policy
            .execute(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt == 1 {
                        Err(TestError::rate_limited(attempt))
                    } else {
                        Err(TestError::permanent(attempt))
                    }
                }
            })
            .await;

        assert_eq!(result, Err(TestError::permanent(2)));
        assert_eq!(sleeper.count(), 1);
    }

    #[tokio::test]
    async fn delays_stay_within_jitter_band_and_cap() {
        let policy: RetryPolicy<TestError> = RetryPolicy::builder()
            .with_jitter_source(SeededSource::new(2024))
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();

        for n in 1..=12usize {
            for _ in 0..50 {
                let delay = policy.delay_for(n).as_secs_f64();
                let floor = 2f64.powi(n as i32);
                assert!(delay <= 60.0, "attempt {} waited {}", n, delay);
                if floor + 1.0 <= 60.0 {
                    assert!(delay >= floor && delay <= floor + 1.0, "attempt {}: {}", n, delay);
                } else {
                    assert!(delay >= floor.min(60.0) - 1.0);
                }
            }
        }
    }

    #[tokio::test]
    async fn cap_applies_after_jitter() {
        let policy: RetryPolicy<TestError> = RetryPolicy::builder()
            .with_jitter_source(FixedSource::new(0.99))
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();
        assert_eq!(policy.delay_for(6), DEFAULT_MAX_DELAY);
        assert_eq!(policy.delay_for(30), DEFAULT_MAX_DELAY);
    }

    #[tokio::test]
    async fn custom_predicate_overrides_classification() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .backoff(Backoff::constant(Duration::from_millis(10)))
            .with_jitter(Jitter::None)
            .should_retry(|e: &TestError| e.attempt < 2)
            .with_sleeper(sleeper.clone())
            .with_observer(MemoryObserver::new())
            .build()
            .expect("builder");
        let calls = AtomicUsize::new(0);

        let result: Result<(), TestError> = policy
            .execute(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(TestError::permanent(attempt)) }
            })
            .await;

        assert_eq!(result, Err(TestError::permanent(2)));
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(10)]);
    }

    #[tokio::test]
    async fn single_attempt_policy_never_retries() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_attempts(1)
            .with_sleeper(sleeper.clone())
            .with_observer(MemoryObserver::new())
            .build()
            .expect("builder");

        let result: Result<(), TestError> =
            policy.execute(|| async { Err(TestError::rate_limited(1)) }).await;

        assert_eq!(result, Err(TestError::rate_limited(1)));
        assert_eq!(sleeper.count(), 0);
    }

    #[tokio::test]
    async fn cancellation_during_wait_returns_triggering_error() {
        let (handle, cancel) = Cancellation::new();
        let observer = MemoryObserver::new();
        let policy = RetryPolicy::builder()
            .with_observer(observer.clone())
            .with_jitter_source(FixedSource::new(0.0))
            .build()
            .expect("builder");
        let calls = AtomicUsize::new(0);

        handle.cancel();
        let result: Result<(), TestError> = policy
            .execute_with_cancel(
                || {
                    let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Err(TestError::rate_limited(attempt)) }
                },
                &cancel,
            )
            .await;

        assert_eq!(result, Err(TestError::rate_limited(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            observer.retry_events().last(),
            Some(RetryEvent::Interrupted { attempt: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wakes_a_sleeping_policy() {
        let (handle, cancel) = Cancellation::new();
        let policy: RetryPolicy<TestError> = RetryPolicy::builder()
            .with_observer(MemoryObserver::new())
            .build()
            .expect("builder");

        let task = tokio::spawn(async move {
            policy
                .execute_with_cancel(|| async { Err::<(), _>(TestError::rate_limited(1)) }, &cancel)
                .await
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.cancel();

        let result = task.await.expect("join");
        assert_eq!(result, Err(TestError::rate_limited(1)));
    }

    #[tokio::test]
    async fn errors_after_cancellation_keep_their_outcome() {
        let (handle, cancel) = Cancellation::new();
        handle.cancel();
        let policy = policy_with(RecordingSleeper::new(), MemoryObserver::new());

        let permanent: Result<(), _> = policy
            .execute_until_cancelled(|| async { Err(TestError::permanent(1)) }, &cancel)
            .await;
        assert_eq!(permanent, Err(RetryStop::Failed(TestError::permanent(1))));

        let transient: Result<(), _> = policy
            .execute_until_cancelled(|| async { Err(TestError::rate_limited(1)) }, &cancel)
            .await;
        let stop = transient.unwrap_err();
        assert!(stop.is_interrupted());
        assert_eq!(stop.into_inner(), TestError::rate_limited(1));
    }

    #[tokio::test]
    async fn exhaustion_is_not_an_interruption_even_when_cancelled() {
        let (handle, cancel) = Cancellation::new();
        let policy = RetryPolicy::builder()
            .max_attempts(1)
            .with_sleeper(InstantSleeper)
            .with_observer(MemoryObserver::new())
            .build()
            .expect("builder");

        let result: Result<(), _> = policy
            .execute_until_cancelled(
                || {
                    handle.cancel();
                    async { Err(TestError::rate_limited(1)) }
                },
                &cancel,
            )
            .await;

        assert_eq!(result, Err(RetryStop::Failed(TestError::rate_limited(1))));
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let err = RetryPolicy::<TestError>::builder().max_attempts(0).build();
        assert!(matches!(err, Err(BuildError::InvalidMaxAttempts(0))));
    }

    #[test]
    fn defaults_match_documented_values() {
        let policy = RetryPolicy::<TestError>::builder().build().unwrap();
        assert_eq!(policy.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        let debug = format!("{:?}", policy);
        assert!(debug.contains("max_delay: 60s"));
    }
}
