//! Retry with exponential backoff.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{AsyncOperation, Metadata, Named, Operation};
use crate::error::AppError;

/// Callback invoked before each wait with the failed attempt number (1-based).
pub type RetryHook = Arc<dyn Fn(u32, &dyn fmt::Display) + Send + Sync>;

/// How many times to call an operation and how long to wait in between.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff_factor: f64,
    on_retry: Option<RetryHook>,
}

impl Default for RetryPolicy {
    /// Three attempts, starting at one second and doubling.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Fixed-delay policy. A `max_attempts` of zero is treated as one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff_factor: 1.0,
            on_retry: None,
        }
    }

    /// Multiplies the delay by `factor` after every failed attempt.
    /// Negative or non-finite factors fall back to a fixed delay.
    #[must_use]
    pub fn with_backoff(mut self, factor: f64) -> Self {
        self.backoff_factor = if factor.is_finite() && factor >= 0.0 {
            factor
        } else {
            1.0
        };
        self
    }

    #[must_use]
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &dyn fmt::Display) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }

    pub const fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    fn notify(&self, attempt: u32, error: &dyn fmt::Display) {
        if let Some(hook) = &self.on_retry {
            hook(attempt, error);
        }
    }
}

/// Decides whether a failed attempt may be retried.
pub trait RetryCondition<E> {
    fn should_retry(&self, error: &E) -> bool;
}

/// Retries every error.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E> RetryCondition<E> for AlwaysRetry {
    fn should_retry(&self, _error: &E) -> bool {
        true
    }
}

/// Retries errors accepted by a predicate.
#[derive(Debug, Clone, Copy)]
pub struct RetryIf<P>(pub P);

impl<E, P> RetryCondition<E> for RetryIf<P>
where
    P: Fn(&E) -> bool,
{
    fn should_retry(&self, error: &E) -> bool {
        (self.0)(error)
    }
}

/// Wrapper produced by [`super::OperationExt::retry`].
#[derive(Clone)]
pub struct Retry<O, C = AlwaysRetry> {
    inner: O,
    policy: RetryPolicy,
    condition: C,
}

impl<O> Retry<O> {
    pub const fn new(inner: O, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            condition: AlwaysRetry,
        }
    }
}

impl<O, C> Retry<O, C> {
    pub const fn with_condition(inner: O, policy: RetryPolicy, condition: C) -> Self {
        Self {
            inner,
            policy,
            condition,
        }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub const fn inner(&self) -> &O {
        &self.inner
    }
}

impl<O: Named, C> Named for Retry<O, C> {
    fn metadata(&self) -> &Metadata {
        self.inner.metadata()
    }
}

/// Outcome of a failed attempt that still has attempts left.
enum Decision {
    Wait(Duration),
    GiveUp,
}

impl<O: Named, C> Retry<O, C> {
    fn on_failure<E>(&self, attempt: u32, error: &E) -> Decision
    where
        C: RetryCondition<E>,
        E: fmt::Display,
    {
        if !self.condition.should_retry(error) {
            tracing::debug!(
                operation = %self.name(),
                attempt,
                error = %error,
                "Error is not retryable"
            );
            return Decision::GiveUp;
        }

        tracing::warn!(
            operation = %self.name(),
            attempt,
            max_attempts = self.policy.max_attempts,
            error = %error,
            "Attempt {attempt} of {} failed: {error}",
            self.name()
        );
        self.policy.notify(attempt, error);
        Decision::Wait(self.policy.delay_for(attempt))
    }

    fn on_exhausted<E: fmt::Display>(&self, error: &E) {
        tracing::error!(
            operation = %self.name(),
            max_attempts = self.policy.max_attempts,
            error = %error,
            "{} still failing after {} attempts",
            self.name(),
            self.policy.max_attempts
        );
    }
}

impl<O, C, Args> Operation<Args> for Retry<O, C>
where
    O: Operation<Args>,
    O::Error: fmt::Display,
    C: RetryCondition<O::Error>,
    Args: Clone,
{
    type Output = O::Output;
    type Error = O::Error;

    fn call(&self, args: Args) -> Result<Self::Output, Self::Error> {
        for attempt in 1..self.policy.max_attempts {
            match self.inner.call(args.clone()) {
                Ok(value) => return Ok(value),
                Err(e) => match self.on_failure(attempt, &e) {
                    Decision::Wait(delay) => std::thread::sleep(delay),
                    Decision::GiveUp => return Err(e),
                },
            }
        }

        // Final attempt consumes the arguments.
        self.inner.call(args).inspect_err(|e| self.on_exhausted(e))
    }
}

impl<O, C, Args> AsyncOperation<Args> for Retry<O, C>
where
    O: AsyncOperation<Args>,
    O::Error: fmt::Display,
    C: RetryCondition<O::Error>,
    Args: Clone,
{
    type Output = O::Output;
    type Error = O::Error;

    async fn call_async(&self, args: Args) -> Result<Self::Output, Self::Error> {
        for attempt in 1..self.policy.max_attempts {
            match self.inner.call_async(args.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => match self.on_failure(attempt, &e) {
                    Decision::Wait(delay) => tokio::time::sleep(delay).await,
                    Decision::GiveUp => return Err(e),
                },
            }
        }

        self.inner
            .call_async(args)
            .await
            .inspect_err(|e| self.on_exhausted(e))
    }
}

/// Retries only connection-class failures (see [`AppError::is_transient`]),
/// doubling `delay` after each failed attempt.
pub fn retry_on_connection_error<O>(
    inner: O,
    max_attempts: u32,
    delay: Duration,
) -> Retry<O, RetryIf<fn(&AppError) -> bool>> {
    Retry::with_condition(
        inner,
        RetryPolicy::new(max_attempts, delay).with_backoff(2.0),
        RetryIf(AppError::is_transient as fn(&AppError) -> bool),
    )
}
