//! Error types for pipeline construction and evaluation.

use std::error::Error as StdError;

use thiserror::Error;

/// Error raised by a caller-supplied function, boxed so its concrete type
/// survives the trip through the pipeline.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by pipelines, stages and loop wrappers.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A stage parameter was malformed. Raised by the call that introduced
    /// it, before any element is pulled.
    #[error("invalid argument to {op}: {reason}")]
    InvalidArgument { op: &'static str, reason: String },

    /// A predicate, transform or action returned an error.
    #[error("user function failed: {0}")]
    UserFunction(#[source] BoxError),

    /// Vectorized mode was requested but cannot be honoured.
    #[error("vectorized execution unsupported: {0}")]
    VectorizationUnsupported(String),

    /// The first failure among the invocations of one parallel batch.
    #[error("parallel stage failed at element {index}: {source}")]
    ParallelStage {
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FlowError {
    pub(crate) fn invalid(op: &'static str, reason: impl Into<String>) -> Self {
        FlowError::InvalidArgument {
            op,
            reason: reason.into(),
        }
    }

    pub(crate) fn user(err: impl Into<BoxError>) -> Self {
        FlowError::UserFunction(err.into())
    }

    /// The error raised by user code, if this failure came from one.
    pub fn user_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            FlowError::UserFunction(err) | FlowError::ParallelStage { source: err, .. } => {
                Some(err.as_ref())
            }
            _ => None,
        }
    }

    /// Recover the boxed user error so callers can downcast it.
    pub fn into_user_error(self) -> Result<BoxError, Self> {
        match self {
            FlowError::UserFunction(err) | FlowError::ParallelStage { source: err, .. } => Ok(err),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug, PartialEq)]
    struct Boom(u32);

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom {}", self.0)
        }
    }

    impl StdError for Boom {}

    #[test]
    fn test_user_error_keeps_identity() {
        let err = FlowError::user(Boom(7));
        assert_eq!(err.to_string(), "user function failed: boom 7");
        let inner = err.into_user_error().unwrap();
        assert_eq!(inner.downcast_ref::<Boom>(), Some(&Boom(7)));
    }

    #[test]
    fn test_parallel_stage_exposes_source() {
        let err = FlowError::ParallelStage {
            index: 3,
            source: Box::new(Boom(1)),
        };
        assert_eq!(err.to_string(), "parallel stage failed at element 3: boom 1");
        assert!(err.user_error().unwrap().downcast_ref::<Boom>().is_some());
        assert!(err.source().is_some());
    }

    #[test]
    fn test_invalid_argument_is_not_user_error() {
        let err = FlowError::invalid("take", "count must be non-negative, got -1");
        assert_eq!(
            err.to_string(),
            "invalid argument to take: count must be non-negative, got -1"
        );
        assert!(err.user_error().is_none());
        assert!(err.into_user_error().is_err());
    }
}
