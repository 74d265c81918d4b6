//! Error types for entiorm core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in entiorm core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An argument passed to a public entry point was invalid.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Entity type is not part of the model.
    #[error("entity type not found: {name}")]
    EntityTypeNotFound {
        /// Name of the entity type.
        name: String,
    },

    /// Property is not declared on the entity type.
    #[error("property '{property}' not found on entity type '{entity_type}'")]
    PropertyNotFound {
        /// Entity type searched.
        entity_type: String,
        /// Property name that was not found.
        property: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The data reader failed or was used out of sequence.
    #[error("data reader error: {message}")]
    DataReader {
        /// Description of the failure.
        message: String,
    },

    /// The underlying connection failed to execute a command.
    #[error("command execution failed: {message}")]
    Execution {
        /// Description of the failure.
        message: String,
    },

    /// A value had a different type than the reader or model expected.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: String,
        /// Actual type name.
        actual: String,
    },

    /// The operation observed a cancellation request.
    #[error("operation cancelled")]
    Cancelled,

    /// Model metadata could not be (de)serialized.
    #[error("model serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a data reader error.
    pub fn data_reader(message: impl Into<String>) -> Self {
        Self::DataReader {
            message: message.into(),
        }
    }

    /// Creates a command execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Returns true if this error is a cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
