//! Execution time measurement.

use std::borrow::Cow;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::Level;

use super::{AsyncOperation, Metadata, Named, Operation};

/// Options for [`Timed`].
#[derive(Debug, Clone)]
pub struct TimingOptions {
    level: Level,
    message: Option<Cow<'static, str>>,
    slow_threshold: Option<Duration>,
}

impl Default for TimingOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            message: None,
            slow_threshold: None,
        }
    }
}

impl TimingOptions {
    /// Reports successful calls at `level`.
    pub fn at(level: Level) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Replaces the operation name in the success message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Reports calls slower than `threshold` at WARN.
    #[must_use]
    pub const fn warn_if_slower_than(mut self, threshold: Duration) -> Self {
        self.slow_threshold = Some(threshold);
        self
    }
}

/// Wrapper produced by [`super::OperationExt::timed`].
#[derive(Clone)]
pub struct Timed<O> {
    inner: O,
    options: TimingOptions,
}

impl<O> Timed<O> {
    pub const fn new(inner: O, options: TimingOptions) -> Self {
        Self { inner, options }
    }
}

impl<O: Named> Named for Timed<O> {
    fn metadata(&self) -> &Metadata {
        self.inner.metadata()
    }
}

impl<O: Named> Timed<O> {
    fn report<T, E: fmt::Display>(&self, result: &Result<T, E>, elapsed: Duration) {
        let name = self.name();
        let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let secs = elapsed.as_secs_f64();

        match result {
            Ok(_) => {
                let label = self.options.message.as_deref().unwrap_or(name);
                match self.options.slow_threshold {
                    Some(threshold) if elapsed > threshold => tracing::warn!(
                        operation = %name,
                        elapsed_us,
                        threshold_us = u64::try_from(threshold.as_micros()).unwrap_or(u64::MAX),
                        "{label} is slow: {secs:.4}s (threshold {:.4}s)",
                        threshold.as_secs_f64()
                    ),
                    _ => event_at!(
                        self.options.level,
                        operation = %name,
                        elapsed_us,
                        "{label} completed in {secs:.4}s"
                    ),
                }
            }
            Err(e) => tracing::error!(
                operation = %name,
                elapsed_us,
                error = %e,
                "{name} failed after {secs:.4}s: {e}"
            ),
        }
    }
}

impl<O, Args> Operation<Args> for Timed<O>
where
    O: Operation<Args>,
    O::Error: fmt::Display,
{
    type Output = O::Output;
    type Error = O::Error;

    fn call(&self, args: Args) -> Result<Self::Output, Self::Error> {
        let start = Instant::now();
        let result = self.inner.call(args);
        self.report(&result, start.elapsed());
        result
    }
}

impl<O, Args> AsyncOperation<Args> for Timed<O>
where
    O: AsyncOperation<Args>,
    O::Error: fmt::Display,
{
    type Output = O::Output;
    type Error = O::Error;

    async fn call_async(&self, args: Args) -> Result<Self::Output, Self::Error> {
        let start = Instant::now();
        let result = self.inner.call_async(args).await;
        self.report(&result, start.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrap::{AsyncOp, Op, OperationExt};

    #[test]
    fn test_default_options() {
        let options = TimingOptions::default();
        assert_eq!(options.level, Level::INFO);
        assert!(options.message.is_none());
        assert!(options.slow_threshold.is_none());
    }

    #[test]
    fn test_options_builder() {
        let options = TimingOptions::at(Level::DEBUG)
            .with_message("nightly import")
            .warn_if_slower_than(Duration::from_secs(2));
        assert_eq!(options.level, Level::DEBUG);
        assert_eq!(options.message.as_deref(), Some("nightly import"));
        assert_eq!(options.slow_threshold, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_timed_returns_result_unchanged() {
        let op = Op::new("identity", |s: String| Ok::<_, String>(s)).timed(TimingOptions::default());
        assert_eq!(op.call("value".to_string()), Ok("value".to_string()));
    }

    #[test]
    fn test_timed_returns_error_unchanged() {
        let op = Op::new("broken", |()| Err::<(), _>("broken pipe".to_string()))
            .timed(TimingOptions::default());
        assert_eq!(op.call(()), Err("broken pipe".to_string()));
    }

    #[test]
    fn test_timed_calls_inner_once() {
        let calls = std::cell::Cell::new(0);
        let op = Op::new("count", |()| {
            calls.set(calls.get() + 1);
            Ok::<_, String>(())
        })
        .timed(TimingOptions::default().warn_if_slower_than(Duration::ZERO));

        op.call(()).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_async_timed_returns_value() {
        let op = AsyncOp::new("sleepy", |ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, String>(ms)
        })
        .timed(TimingOptions::default());

        assert_eq!(op.call_async(5).await, Ok(5));
    }
}
