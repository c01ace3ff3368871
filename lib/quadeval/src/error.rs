use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;

/// A query evaluation error.
///
/// Cursors latch the first error they observe and keep reporting it until
/// they are closed, so the payloads of the type-erased variants are
/// reference-counted and the whole type is cheap to clone.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum QueryEvaluationError {
    /// Error from the underlying quad store, surfaced unchanged
    #[error("{0}")]
    Store(Arc<dyn Error + Send + Sync>),
    /// Error raised by a value filter callback
    #[error("{0}")]
    Predicate(Arc<dyn Error + Send + Sync>),
    /// The evaluation has been cancelled or its deadline has passed
    #[error("the query evaluation has been cancelled")]
    Cancelled,
    /// The plan is structurally invalid
    #[error("invalid query plan: {0}")]
    Plan(String),
}

impl QueryEvaluationError {
    #[inline]
    pub fn store(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Store(Arc::new(error))
    }

    #[inline]
    pub fn predicate(error: Box<dyn Error + Send + Sync>) -> Self {
        Self::Predicate(error.into())
    }
}

impl From<Infallible> for QueryEvaluationError {
    #[inline]
    fn from(error: Infallible) -> Self {
        match error {}
    }
}
