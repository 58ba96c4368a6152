//! Argument validation before the call.

use validator::{Validate, ValidationErrors};

use super::{AsyncOperation, Metadata, Named, Operation};

/// Wrapper produced by [`super::OperationExt::validated`].
///
/// Runs [`Validate::validate`] on the arguments and only calls the inner
/// operation when they pass.
#[derive(Clone)]
pub struct Validated<O> {
    inner: O,
}

impl<O> Validated<O> {
    pub const fn new(inner: O) -> Self {
        Self { inner }
    }
}

impl<O: Named> Named for Validated<O> {
    fn metadata(&self) -> &Metadata {
        self.inner.metadata()
    }
}

impl<O: Named> Validated<O> {
    fn check<Args: Validate>(&self, args: &Args) -> Result<(), ValidationErrors> {
        args.validate().inspect_err(|e| {
            tracing::warn!(operation = %self.name(), error = %e, "Rejected invalid arguments");
        })
    }
}

impl<O, Args> Operation<Args> for Validated<O>
where
    O: Operation<Args>,
    O::Error: From<ValidationErrors>,
    Args: Validate,
{
    type Output = O::Output;
    type Error = O::Error;

    fn call(&self, args: Args) -> Result<Self::Output, Self::Error> {
        self.check(&args)?;
        self.inner.call(args)
    }
}

impl<O, Args> AsyncOperation<Args> for Validated<O>
where
    O: AsyncOperation<Args>,
    O::Error: From<ValidationErrors>,
    Args: Validate,
{
    type Output = O::Output;
    type Error = O::Error;

    async fn call_async(&self, args: Args) -> Result<Self::Output, Self::Error> {
        self.check(&args)?;
        self.inner.call_async(args).await
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::AppError;
    use crate::wrap::{AsyncOp, Op, OperationExt};

    #[derive(Debug, Clone, Validate)]
    struct Signup {
        #[validate(email(message = "invalid email"))]
        email: String,
        #[validate(range(min = 18, message = "too young"))]
        age: u8,
    }

    #[test]
    fn test_valid_args_reach_inner() {
        let calls = Cell::new(0);
        let op = Op::new("signup", |s: Signup| {
            calls.set(calls.get() + 1);
            Ok::<_, AppError>(s.email)
        })
        .validated();

        let result = op.call(Signup {
            email: "a@example.com".to_string(),
            age: 30,
        });
        assert_eq!(result.unwrap(), "a@example.com");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_invalid_args_skip_inner() {
        let calls = Cell::new(0);
        let op = Op::new("signup", |_: Signup| {
            calls.set(calls.get() + 1);
            Ok::<_, AppError>(())
        })
        .validated();

        let result = op.call(Signup {
            email: "not-an-email".to_string(),
            age: 30,
        });
        assert!(matches!(result, Err(AppError::Validation(msg)) if msg == "invalid email"));
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test]
    async fn test_async_invalid_args() {
        let op = AsyncOp::new("signup", |_: Signup| async { Ok::<_, AppError>(()) }).validated();
        let result = op
            .call_async(Signup {
                email: "a@example.com".to_string(),
                age: 3,
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(msg)) if msg == "too young"));
    }
}
