//! Bounded exponential backoff around a [`PartitionFetcher`].
//!
//! Only [`FetchError::Transient`] is retried. Permanent errors return on the
//! first attempt. The sleep is injected through [`Sleeper`] so tests can
//! record delays instead of waiting them out.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::provider::{FetchError, PartitionFetcher, RawElement};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always >= 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: if multiplier.is_finite() && multiplier >= 1.0 {
                multiplier
            } else {
                1.0
            },
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based: the wait after the first
    /// failure is `delay_for(1) == base_delay`). Capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        if !scaled.is_finite() || scaled >= cap {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Wraps a fetcher with [`RetryPolicy`]. Itself a [`PartitionFetcher`].
pub struct RetryingFetcher<F, S = TokioSleeper> {
    inner: F,
    policy: RetryPolicy,
    sleeper: S,
}

impl<F> RetryingFetcher<F, TokioSleeper> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            sleeper: TokioSleeper,
        }
    }
}

impl<F, S> RetryingFetcher<F, S> {
    pub fn with_sleeper(inner: F, policy: RetryPolicy, sleeper: S) -> Self {
        Self {
            inner,
            policy,
            sleeper,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait::async_trait]
impl<F, S> PartitionFetcher for RetryingFetcher<F, S>
where
    F: PartitionFetcher,
    S: Sleeper,
{
    fn source_name(&self) -> &'static str {
        self.inner.source_name()
    }

    async fn fetch_partition(&self, partition: &str) -> Result<Vec<RawElement>, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.fetch_partition(partition).await {
                Ok(elements) => return Ok(elements),
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        partition,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %err,
                        "fetch failed; retrying after {:?}",
                        delay
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait::async_trait]
impl<T: PartitionFetcher + ?Sized> PartitionFetcher for Arc<T> {
    fn source_name(&self) -> &'static str {
        (**self).source_name()
    }

    async fn fetch_partition(&self, partition: &str) -> Result<Vec<RawElement>, FetchError> {
        (**self).fetch_partition(partition).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of outcomes, one per call.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<Vec<RawElement>, FetchError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<Vec<RawElement>, FetchError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            }
        }
        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl PartitionFetcher for Scripted {
        fn source_name(&self) -> &'static str {
            "scripted"
        }
        async fn fetch_partition(&self, _p: &str) -> Result<Vec<RawElement>, FetchError> {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Permanent("script exhausted".into())))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait::async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_millis(100), 2.0, Duration::from_millis(250))
    }

    #[test]
    fn delay_grows_exponentially_and_is_capped() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(250));
        assert_eq!(p.delay_for(40), Duration::from_millis(250));
    }

    #[test]
    fn policy_clamps_degenerate_inputs() {
        let p = RetryPolicy::new(0, Duration::from_millis(10), f64::NAN, Duration::from_secs(1));
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.multiplier, 1.0);
    }

    #[tokio::test]
    async fn transient_then_success_retries_with_backoff() {
        let inner = Scripted::new(vec![
            Err(FetchError::Transient("503".into())),
            Err(FetchError::Transient("429".into())),
            Ok(vec![RawElement::default()]),
        ]);
        let sleeper = RecordingSleeper::default();
        let f = RetryingFetcher::with_sleeper(inner, policy(), sleeper);

        let out = f.fetch_partition("NY").await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(f.inner.calls(), 3);
        assert_eq!(
            *f.sleeper.delays.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let inner = Scripted::new(vec![Err(FetchError::Permanent("400".into()))]);
        let f = RetryingFetcher::with_sleeper(inner, policy(), RecordingSleeper::default());

        let err = f.fetch_partition("NY").await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(f.inner.calls(), 1);
        assert!(f.sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_with_last_error() {
        let inner = Scripted::new(vec![
            Err(FetchError::Transient("a".into())),
            Err(FetchError::Transient("b".into())),
            Err(FetchError::Transient("c".into())),
            Err(FetchError::Transient("d".into())),
            Ok(vec![]),
        ]);
        let f = RetryingFetcher::with_sleeper(inner, policy(), RecordingSleeper::default());

        let err = f.fetch_partition("NY").await.unwrap_err();
        assert_eq!(err, FetchError::Transient("d".into()));
        assert_eq!(f.inner.calls(), 4);
        assert_eq!(f.sleeper.delays.lock().unwrap().len(), 3);
    }
}
