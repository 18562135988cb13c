//! Error types for TrialScope.
//!
//! All errors are strongly typed using thiserror and classified into the
//! three kinds a caller can act on: invalid arguments, missing experiments,
//! and internal (store) failures. Client cancellation is not an error; stream
//! sessions report it through their outcome instead.

use thiserror::Error;

use crate::experiment::ExperimentId;
use crate::search::TrialId;
use crate::storage::StorageError;

/// Validation errors that occur before any store access or computation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("must provide a training metric or a validation metric: neither provided")]
    MissingMetricSelector,

    #[error("must provide a training metric or a validation metric: not both")]
    ConflictingMetricSelectors,

    #[error("unsupported searcher operation: {operation}")]
    UnsupportedOperation {
        operation: String,
    },

    #[error("unsupported training length unit: {unit}")]
    UnsupportedLengthUnit {
        unit: String,
    },

    #[error("length of {units} units exceeds the supported maximum of {}", i32::MAX)]
    LengthOutOfRange {
        units: u64,
    },

    #[error("invalid experiment id: {value}")]
    InvalidExperimentId {
        value: i64,
    },

    #[error("invalid hyperparameter '{name}': {reason}")]
    InvalidHyperparameter {
        name: String,
        reason: String,
    },

    #[error("invalid configuration field '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Execution errors raised while a stream or simulation is running.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("experiment {id} not found")]
    ExperimentNotFound {
        id: ExperimentId,
    },

    #[error("{context}: {source}")]
    Storage {
        context: String,
        source: StorageError,
    },

    #[error("consumer disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Simulation limit exceeded: {limit_type} (max: {max_value}, actual: {actual_value})")]
    SimulationLimitExceeded {
        limit_type: String,
        max_value: u64,
        actual_value: u64,
    },

    #[error("search method referenced unknown trial {trial}")]
    UnknownTrial {
        trial: TrialId,
    },

    #[error("search method created trial {trial} twice")]
    DuplicateTrial {
        trial: TrialId,
    },

    #[error("search method addressed trial {trial} after closing it")]
    TrialClosed {
        trial: TrialId,
    },
}

/// Coarse classification of an error, used at the transport edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request or unsupported simulation output.
    InvalidArgument,
    /// Unknown experiment or configuration.
    NotFound,
    /// Store failure or broken invariant.
    Internal,
}

/// Top-level error type for TrialScope.
#[derive(Debug, Error)]
pub enum TrialScopeError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl TrialScopeError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wraps a storage failure with the query it came from.
    ///
    /// A missing experiment stays a not-found error; everything else becomes
    /// an internal storage error carrying `context`.
    #[must_use]
    pub fn storage(context: impl Into<String>, source: StorageError) -> Self {
        match source {
            StorageError::ExperimentNotFound(id) => {
                Self::Execution(ExecutionError::ExperimentNotFound { id })
            }
            source => Self::Execution(ExecutionError::Storage {
                context: context.into(),
                source,
            }),
        }
    }

    /// Creates the error reported when an update can no longer be delivered.
    #[must_use]
    pub fn disconnected(path: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Disconnected { path: path.into() })
    }

    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::InvalidArgument,
            Self::Execution(ExecutionError::ExperimentNotFound { .. }) => ErrorKind::NotFound,
            Self::Execution(_) | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if the referenced experiment does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Internal)
    }
}

/// Result type alias for TrialScope operations.
pub type TrialScopeResult<T> = Result<T, TrialScopeError>;
