//! Before/after call logging.

use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

use tracing::Level;

use super::{AsyncOperation, Metadata, Named, Operation};

/// Leaves a value out of the log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hidden;

/// Renders a value into the log records with its `Debug` impl.
#[derive(Debug, Clone, Copy, Default)]
pub struct Shown;

/// How [`Logged`] renders arguments or results.
///
/// Only [`Shown`] needs `T: Debug`, so operations whose arguments or output
/// have no `Debug` impl can still be logged with the default options.
pub trait Render<T: ?Sized> {
    fn render(value: &T) -> Option<String>;
}

impl<T: ?Sized> Render<T> for Hidden {
    fn render(_value: &T) -> Option<String> {
        None
    }
}

impl<T: fmt::Debug + ?Sized> Render<T> for Shown {
    fn render(value: &T) -> Option<String> {
        Some(format!("{value:?}"))
    }
}

/// Options for [`Logged`].
///
/// `A` and `R` select whether the arguments and the result appear in the
/// records; see [`LogOptions::with_args`] and [`LogOptions::with_result`].
#[derive(Debug, Clone)]
pub struct LogOptions<A = Hidden, R = Hidden> {
    level: Level,
    label: Option<Cow<'static, str>>,
    _render: PhantomData<fn() -> (A, R)>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            label: None,
            _render: PhantomData,
        }
    }
}

impl LogOptions {
    pub fn at(level: Level) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }
}

impl<A, R> LogOptions<A, R> {
    pub const fn level(&self) -> Level {
        self.level
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Includes the `Debug` rendering of the arguments in the pre-call record.
    #[must_use]
    pub fn with_args(self) -> LogOptions<Shown, R> {
        LogOptions {
            level: self.level,
            label: self.label,
            _render: PhantomData,
        }
    }

    /// Includes the `Debug` rendering of the output in the post-call record.
    #[must_use]
    pub fn with_result(self) -> LogOptions<A, Shown> {
        LogOptions {
            level: self.level,
            label: self.label,
            _render: PhantomData,
        }
    }

    /// Uses `label` instead of the operation name in messages.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Wrapper produced by [`super::OperationExt::logged`].
///
/// Every call produces exactly one record before the inner call and one
/// after it: `phase = "after"` on success, `phase = "error"` (always at
/// ERROR) on failure.
#[derive(Clone)]
pub struct Logged<O, A = Hidden, R = Hidden> {
    inner: O,
    options: LogOptions<A, R>,
}

impl<O, A, R> Logged<O, A, R> {
    pub const fn new(inner: O, options: LogOptions<A, R>) -> Self {
        Self { inner, options }
    }
}

impl<O: Named, A, R> Named for Logged<O, A, R> {
    fn metadata(&self) -> &Metadata {
        self.inner.metadata()
    }
}

impl<O: Named, A, R> Logged<O, A, R> {
    fn label(&self) -> &str {
        self.options.label().unwrap_or_else(|| self.name())
    }

    fn before<Args>(&self, args: &Args)
    where
        A: Render<Args>,
    {
        let label = self.label();
        match A::render(args) {
            Some(rendered) => event_at!(
                self.options.level,
                operation = %self.name(),
                phase = "before",
                args = %rendered,
                "Calling {label} with {rendered}"
            ),
            None => event_at!(
                self.options.level,
                operation = %self.name(),
                phase = "before",
                "Calling {label}"
            ),
        }
    }

    fn after<T, E: fmt::Display>(&self, result: &Result<T, E>)
    where
        R: Render<T>,
    {
        let label = self.label();
        match result {
            Ok(value) => match R::render(value) {
                Some(rendered) => event_at!(
                    self.options.level,
                    operation = %self.name(),
                    phase = "after",
                    result = %rendered,
                    "{label} returned {rendered}"
                ),
                None => event_at!(
                    self.options.level,
                    operation = %self.name(),
                    phase = "after",
                    "{label} completed"
                ),
            },
            Err(e) => tracing::error!(
                operation = %self.name(),
                phase = "error",
                error = %e,
                "{label} failed: {e}"
            ),
        }
    }
}

impl<O, A, R, Args> Operation<Args> for Logged<O, A, R>
where
    O: Operation<Args>,
    O::Error: fmt::Display,
    A: Render<Args>,
    R: Render<O::Output>,
{
    type Output = O::Output;
    type Error = O::Error;

    fn call(&self, args: Args) -> Result<Self::Output, Self::Error> {
        self.before(&args);
        let result = self.inner.call(args);
        self.after(&result);
        result
    }
}

impl<O, A, R, Args> AsyncOperation<Args> for Logged<O, A, R>
where
    O: AsyncOperation<Args>,
    O::Error: fmt::Display,
    A: Render<Args>,
    R: Render<O::Output>,
{
    type Output = O::Output;
    type Error = O::Error;

    async fn call_async(&self, args: Args) -> Result<Self::Output, Self::Error> {
        self.before(&args);
        let result = self.inner.call_async(args).await;
        self.after(&result);
        result
    }
}
