//! Error types for the update pipeline.

use entiorm_core::{CoreError, EntityState, UpdateEntry};
use std::sync::Arc;
use thiserror::Error;

/// Result type for update operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Errors raised while preparing or executing a save.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// A command affected a different number of rows than expected.
    ///
    /// The row was modified or deleted by someone else since it was read.
    #[error(
        "database operation expected to affect {expected} row(s) but actually affected {actual} row(s)"
    )]
    Concurrency {
        /// Rows the command should have affected.
        expected: i64,
        /// Rows the store reported.
        actual: i64,
        /// Entries of the offending command.
        entries: Vec<Arc<dyn UpdateEntry>>,
    },

    /// Executing a command or consuming its results failed.
    #[error("an error occurred while updating the entries: {message}")]
    Update {
        /// Description of the failure.
        message: String,
        /// Entries of the command in flight.
        entries: Vec<Arc<dyn UpdateEntry>>,
        /// Underlying failure.
        #[source]
        source: CoreError,
    },

    /// Entries in different states were combined into one command.
    #[error("cannot combine a {added:?} entry with {existing:?} entries for table '{table}'")]
    ConflictingStates {
        /// Table of the command.
        table: String,
        /// State of the entries already in the command.
        existing: EntityState,
        /// State of the rejected entry.
        added: EntityState,
    },

    /// An argument passed to a public entry point was invalid.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// The save observed a cancellation request.
    #[error("save cancelled")]
    Cancelled,

    /// Error from the core contracts.
    #[error(transparent)]
    Core(CoreError),
}

impl UpdateError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a concurrency error for a command expected to affect one row.
    pub fn concurrency(actual: i64, entries: Vec<Arc<dyn UpdateEntry>>) -> Self {
        Self::Concurrency {
            expected: 1,
            actual,
            entries,
        }
    }

    /// Wraps a store failure with the entries it was saving.
    ///
    /// Cancellation stays [`UpdateError::Cancelled`].
    pub fn update(source: CoreError, entries: Vec<Arc<dyn UpdateEntry>>) -> Self {
        match source {
            CoreError::Cancelled => Self::Cancelled,
            source => Self::Update {
                message: source.to_string(),
                entries,
                source,
            },
        }
    }

    /// Returns the entries implicated by the failure, if any.
    pub fn entries(&self) -> &[Arc<dyn UpdateEntry>] {
        match self {
            Self::Concurrency { entries, .. } | Self::Update { entries, .. } => entries,
            _ => &[],
        }
    }

    /// Returns true for optimistic concurrency violations.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

impl From<CoreError> for UpdateError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Cancelled => Self::Cancelled,
            other => Self::Core(other),
        }
    }
}
