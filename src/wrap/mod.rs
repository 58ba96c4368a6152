//! Composable wrappers for cross-cutting concerns.
//!
//! An operation is a named callable implementing [`Operation`] (blocking)
//! or [`AsyncOperation`] (future-returning). Wrappers are built with the
//! adaptors of [`OperationExt`]; the adaptor applied last is the outermost
//! wrapper, so its pre-call logic runs first and its post-call logic last.
//!
//! ```
//! use std::time::Duration;
//! use service_skeleton::wrap::{Named, Op, Operation, OperationExt, RetryPolicy, TimingOptions};
//!
//! let op = Op::new("double", |x: u32| Ok::<_, String>(x * 2))
//!     .timed(TimingOptions::default())
//!     .retry(RetryPolicy::new(3, Duration::ZERO));
//!
//! assert_eq!(op.call(21), Ok(42));
//! assert_eq!(op.name(), "double");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

/// Emits a `tracing` event at a level chosen at runtime.
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {{
        let level: ::tracing::Level = $level;
        if level == ::tracing::Level::ERROR {
            ::tracing::error!($($arg)+);
        } else if level == ::tracing::Level::WARN {
            ::tracing::warn!($($arg)+);
        } else if level == ::tracing::Level::INFO {
            ::tracing::info!($($arg)+);
        } else if level == ::tracing::Level::DEBUG {
            ::tracing::debug!($($arg)+);
        } else {
            ::tracing::trace!($($arg)+);
        }
    }};
}

pub mod batch;
pub mod cache;
pub mod logging;
pub mod retry;
pub mod timing;
pub mod validation;

pub use batch::Batched;
pub use cache::Cached;
pub use logging::{Hidden, LogOptions, Logged, Render, Shown};
pub use retry::{retry_on_connection_error, AlwaysRetry, Retry, RetryCondition, RetryIf, RetryPolicy};
pub use timing::{Timed, TimingOptions};
pub use validation::Validated;

/// Identity of an operation: its name and optional documentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    name: Cow<'static, str>,
    doc: Option<Cow<'static, str>>,
}

impl Metadata {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            doc: None,
        }
    }

    #[must_use]
    pub fn with_doc(mut self, doc: impl Into<Cow<'static, str>>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }
}

/// Access to an operation's identity.
///
/// Wrappers forward this to the operation they wrap, so a wrapped operation
/// reports the same name and documentation as the operation it wraps.
pub trait Named {
    fn metadata(&self) -> &Metadata;

    fn name(&self) -> &str {
        self.metadata().name()
    }

    fn doc(&self) -> Option<&str> {
        self.metadata().doc()
    }
}

/// A blocking operation taking `Args` and returning a `Result`.
pub trait Operation<Args>: Named {
    type Output;
    type Error;

    fn call(&self, args: Args) -> Result<Self::Output, Self::Error>;
}

/// A future-returning operation taking `Args`.
pub trait AsyncOperation<Args>: Named {
    type Output;
    type Error;

    fn call_async(&self, args: Args) -> impl Future<Output = Result<Self::Output, Self::Error>>;
}

/// Adapts a blocking closure or function into an [`Operation`].
#[derive(Clone)]
pub struct Op<F> {
    meta: Metadata,
    f: F,
}

impl<F> Op<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            meta: Metadata::new(name),
            f,
        }
    }

    #[must_use]
    pub fn with_doc(mut self, doc: impl Into<Cow<'static, str>>) -> Self {
        self.meta = self.meta.with_doc(doc);
        self
    }
}

impl<F> Named for Op<F> {
    fn metadata(&self) -> &Metadata {
        &self.meta
    }
}

impl<F, Args, T, E> Operation<Args> for Op<F>
where
    F: Fn(Args) -> Result<T, E>,
{
    type Output = T;
    type Error = E;

    fn call(&self, args: Args) -> Result<T, E> {
        (self.f)(args)
    }
}

/// Adapts a closure returning a future into an [`AsyncOperation`].
#[derive(Clone)]
pub struct AsyncOp<F> {
    meta: Metadata,
    f: F,
}

impl<F> AsyncOp<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            meta: Metadata::new(name),
            f,
        }
    }

    #[must_use]
    pub fn with_doc(mut self, doc: impl Into<Cow<'static, str>>) -> Self {
        self.meta = self.meta.with_doc(doc);
        self
    }
}

impl<F> Named for AsyncOp<F> {
    fn metadata(&self) -> &Metadata {
        &self.meta
    }
}

impl<F, Fut, Args, T, E> AsyncOperation<Args> for AsyncOp<F>
where
    F: Fn(Args) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    type Output = T;
    type Error = E;

    fn call_async(&self, args: Args) -> impl Future<Output = Result<T, E>> {
        (self.f)(args)
    }
}

/// Adaptors shared by every operation.
pub trait OperationExt: Named + Sized {
    /// Re-invokes the operation on failure according to `policy`.
    fn retry(self, policy: RetryPolicy) -> Retry<Self> {
        Retry::new(self, policy)
    }

    /// Like [`OperationExt::retry`], retrying only errors accepted by `condition`.
    fn retry_if<P>(self, policy: RetryPolicy, condition: P) -> Retry<Self, RetryIf<P>> {
        Retry::with_condition(self, policy, RetryIf(condition))
    }

    /// Measures and reports the wall-clock duration of each call.
    fn timed(self, options: TimingOptions) -> Timed<Self> {
        Timed::new(self, options)
    }

    /// Logs each call before and after it runs.
    fn logged<A, R>(self, options: LogOptions<A, R>) -> Logged<Self, A, R> {
        Logged::new(self, options)
    }

    /// Validates the arguments before each call.
    fn validated(self) -> Validated<Self> {
        Validated::new(self)
    }

    /// Memoizes successful results per argument value for `ttl`.
    fn cached<K, V>(self, ttl: Duration) -> Cached<Self, K, V>
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        Cached::new(self, ttl)
    }

    /// Splits a `Vec` argument into chunks of `batch_size` items.
    fn batched(self, batch_size: usize) -> Batched<Self> {
        Batched::new(self, batch_size)
    }
}

impl<T: Named> OperationExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_one(x: i32) -> Result<i32, String> {
        Ok(x + 1)
    }

    #[test]
    fn test_op_calls_function() {
        let op = Op::new("add_one", add_one);
        assert_eq!(op.call(1), Ok(2));
    }

    #[test]
    fn test_op_exposes_name_and_doc() {
        let op = Op::new("add_one", add_one).with_doc("Adds one.");
        assert_eq!(op.name(), "add_one");
        assert_eq!(op.doc(), Some("Adds one."));
    }

    #[test]
    fn test_op_without_doc() {
        let op = Op::new("add_one", add_one);
        assert_eq!(op.doc(), None);
    }

    #[test]
    fn test_op_accepts_tuple_arguments() {
        let op = Op::new("concat", |(a, b): (&str, &str)| {
            Ok::<_, String>(format!("{a}{b}"))
        });
        assert_eq!(op.call(("ab", "cd")), Ok("abcd".to_string()));
    }

    #[test]
    fn test_wrappers_preserve_metadata() {
        let op = Op::new("add_one", add_one)
            .with_doc("Adds one.")
            .logged(LogOptions::default())
            .timed(TimingOptions::default())
            .retry(RetryPolicy::new(2, Duration::ZERO));

        assert_eq!(op.name(), "add_one");
        assert_eq!(op.doc(), Some("Adds one."));
        assert_eq!(op.call(41), Ok(42));
    }

    #[test]
    fn test_metadata_equality() {
        let a = Metadata::new("x").with_doc("d");
        let b = Metadata::new("x".to_string()).with_doc("d".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn test_async_op_calls_closure() {
        let op = AsyncOp::new("square", |x: u64| async move { Ok::<_, String>(x * x) });
        assert_eq!(tokio_test::block_on(op.call_async(7)), Ok(49));
        assert_eq!(op.name(), "square");
    }

    #[test]
    fn test_async_op_error() {
        let op = AsyncOp::new("reject", |_: ()| async { Err::<(), _>("rejected".to_string()) });
        tokio_test::assert_err!(tokio_test::block_on(op.call_async(())));
    }
}
