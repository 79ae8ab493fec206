//! Error observers.
//!
//! The host registers [`ErrorReporter`]s when it builds the [`Cardseal`]
//! handle; every error returned from a public operation is shown to each of
//! them first. A panicking reporter is contained and logged, and the caller
//! still receives the original error.
//!
//! [`Cardseal`]: crate::Cardseal

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::SdkError;

pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &SdkError);
}

/// Adapts a closure into an [`ErrorReporter`].
pub struct FnReporter<F>(F);

impl<F> FnReporter<F>
where
    F: Fn(&SdkError) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ErrorReporter for FnReporter<F>
where
    F: Fn(&SdkError) + Send + Sync,
{
    fn report(&self, error: &SdkError) {
        (self.0)(error)
    }
}

/// Reporters fixed at construction.
#[derive(Clone, Default)]
pub struct Reporters {
    observers: Vec<Arc<dyn ErrorReporter>>,
}

impl Reporters {
    pub fn new(observers: Vec<Arc<dyn ErrorReporter>>) -> Self {
        Self { observers }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Show `error` to every reporter in registration order.
    pub fn emit(&self, error: &SdkError) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| observer.report(error))).is_err() {
                tracing::warn!("Error reporter panicked while handling {}", error.code());
            }
        }
    }

    /// Pass `result` through, emitting its error if there is one.
    pub fn observe<T>(&self, result: Result<T, SdkError>) -> Result<T, SdkError> {
        if let Err(e) = &result {
            self.emit(e);
        }
        result
    }
}

impl std::fmt::Debug for Reporters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporters")
            .field("count", &self.observers.len())
            .finish()
    }
}
