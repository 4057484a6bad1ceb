//! Fail-quiet execution wrapper
//!
//! Single data-access operations never raise past this layer. Whatever goes
//! wrong (a malformed filter, a lost connection, a timeout, a constraint
//! violation, a panic) is logged and folded into an [`Outcome::Failed`], so
//! callers branch on the outcome instead of handling errors at every call
//! site.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use sqlgate::error::{DatabaseOperation, Error};
//! use sqlgate::execution::{run, Outcome};
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let outcome: Outcome<Vec<i64>> = rt.block_on(run(
//!     DatabaseOperation::Query,
//!     Duration::from_secs(1),
//!     async { Err(Error::InvalidRequest("nope".into())) },
//! ));
//! assert!(!outcome.succeeded());
//! assert_eq!(outcome.into_flags(), (Vec::new(), false, false));
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;

use crate::error::{DatabaseError, DatabaseOperation, Error, Result};
use crate::query::SqlValue;
use crate::row::Row;

/// Whether a successful value carries data
///
/// An operation can succeed and legitimately return nothing; this is the
/// `has_data` half of an [`Outcome`].
pub trait HasData {
    /// True when the value is non-empty or non-null
    fn has_data(&self) -> bool;
}

impl<T> HasData for Vec<T> {
    fn has_data(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> HasData for Option<T> {
    fn has_data(&self) -> bool {
        self.is_some()
    }
}

/// Affected-row counts carry data when at least one row was touched
impl HasData for u64 {
    fn has_data(&self) -> bool {
        *self > 0
    }
}

impl HasData for () {
    fn has_data(&self) -> bool {
        false
    }
}

impl HasData for SqlValue {
    fn has_data(&self) -> bool {
        !self.is_null()
    }
}

impl HasData for Row {
    fn has_data(&self) -> bool {
        !self.is_empty()
    }
}

/// Result of a fail-quiet operation
#[derive(Debug)]
#[must_use]
pub enum Outcome<T> {
    /// The operation completed; `has_data` reports whether it found anything
    Succeeded {
        /// Value produced by the operation
        value: T,
        /// Whether `value` is non-empty
        has_data: bool,
    },
    /// The operation failed; the cause is kept for inspection
    Failed(Error),
}

impl<T: HasData> Outcome<T> {
    /// Wrap a successful value, deriving `has_data` from it
    pub fn succeeded_with(value: T) -> Self {
        let has_data = value.has_data();
        Self::Succeeded { value, has_data }
    }
}

impl<T> Outcome<T> {
    /// Whether the operation completed without failure
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Whether the operation succeeded and produced data
    pub fn has_data(&self) -> bool {
        matches!(self, Self::Succeeded { has_data: true, .. })
    }

    /// The value, if the operation succeeded
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Succeeded { value, .. } => Some(value),
            Self::Failed(_) => None,
        }
    }

    /// The failure cause, if the operation failed
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed(err) => Some(err),
        }
    }

    /// Consume into the value, discarding any failure
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Succeeded { value, .. } => Some(value),
            Self::Failed(_) => None,
        }
    }

    /// Convert back into a `Result` for callers that prefer `?`
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Succeeded { value, .. } => Ok(value),
            Self::Failed(err) => Err(err),
        }
    }

    /// Map the successful value, keeping `has_data`
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Succeeded { value, has_data } => Outcome::Succeeded {
                value: f(value),
                has_data,
            },
            Self::Failed(err) => Outcome::Failed(err),
        }
    }
}

impl<T: Default> Outcome<T> {
    /// Flatten into `(value, succeeded, has_data)`
    ///
    /// A failed outcome yields the default (empty) value.
    pub fn into_flags(self) -> (T, bool, bool) {
        match self {
            Self::Succeeded { value, has_data } => (value, true, has_data),
            Self::Failed(_) => (T::default(), false, false),
        }
    }
}

impl<T: HasData> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::succeeded_with(value),
            Err(err) => Self::Failed(err),
        }
    }
}

/// Run `future` under `limit`, folding every failure into the outcome
///
/// Exceeding the limit is a failure like any other; the future is dropped,
/// which releases any connection it holds. Panics are caught and reported as
/// [`Error::Panicked`].
pub async fn run<T, F>(operation: DatabaseOperation, limit: Duration, future: F) -> Outcome<T>
where
    T: HasData,
    F: Future<Output = Result<T>>,
{
    let guarded = AssertUnwindSafe(future).catch_unwind();
    let result = match tokio::time::timeout(limit, guarded).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(Error::Panicked(panic_message(panic.as_ref()))),
        Err(_) => Err(DatabaseError::timeout(operation, limit).into()),
    };
    settle(operation, result)
}

/// Synchronous counterpart of [`run`] for blocking operations
///
/// No timeout is applied; the closure is expected to enforce its own.
pub fn run_blocking<T, F>(operation: DatabaseOperation, f: F) -> Outcome<T>
where
    T: HasData,
    F: FnOnce() -> Result<T>,
{
    let result = match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(Error::Panicked(panic_message(panic.as_ref()))),
    };
    settle(operation, result)
}

fn settle<T: HasData>(operation: DatabaseOperation, result: Result<T>) -> Outcome<T> {
    match result {
        Ok(value) => {
            let outcome = Outcome::succeeded_with(value);
            tracing::debug!(%operation, has_data = outcome.has_data(), "Operation succeeded");
            outcome
        }
        Err(err) => {
            tracing::warn!(
                %operation,
                error = %err,
                caller_input = err.is_caller_input(),
                "Operation failed"
            );
            Outcome::Failed(err)
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
