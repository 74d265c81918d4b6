//! Error types for query compilation and execution.

use entiorm_core::CoreError;
use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while compiling or executing a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// An operator or expression has no mapping in the provider.
    ///
    /// Raised while compiling, before any round trip to the store.
    #[error("could not translate '{construct}': {details}")]
    Translation {
        /// Printed form of the construct that failed.
        construct: String,
        /// Why it could not be translated.
        details: String,
    },

    /// `Single`/`First` found no element.
    #[error("sequence contains no elements")]
    NoElements,

    /// `Single`/`SingleOrDefault` found more than one element.
    #[error("sequence contains more than one element")]
    MoreThanOneElement,

    /// A non-nullable entity shaper read a null key.
    #[error("entity '{entity_type}' was materialized with a null key")]
    InvalidKey {
        /// Entity type being materialized.
        entity_type: String,
    },

    /// A query parameter referenced by the query has no value.
    #[error("no value supplied for query parameter '{name}'")]
    MissingParameter {
        /// Parameter name.
        name: String,
    },

    /// Client-side evaluation of a translated expression failed.
    #[error("evaluation error: {message}")]
    Evaluation {
        /// Description of the failure.
        message: String,
    },

    /// Execution observed a cancellation request.
    #[error("query cancelled")]
    Cancelled,

    /// Error from the core contracts.
    #[error(transparent)]
    Core(CoreError),
}

impl QueryError {
    /// Creates a translation error.
    pub fn translation(construct: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Translation {
            construct: construct.into(),
            details: details.into(),
        }
    }

    /// Creates an evaluation error.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Returns true for translation failures.
    pub fn is_translation(&self) -> bool {
        matches!(self, Self::Translation { .. })
    }
}

impl From<CoreError> for QueryError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Cancelled => Self::Cancelled,
            other => Self::Core(other),
        }
    }
}
