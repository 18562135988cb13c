//! Experiment identity, lifecycle states, and metric selection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Identifier of a training experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(u32);

impl ExperimentId {
    /// Wraps a raw experiment id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i32> for ExperimentId {
    type Error = ValidationError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .map(Self)
            .map_err(|_| ValidationError::InvalidExperimentId {
                value: i64::from(value),
            })
    }
}

/// Lifecycle state of an experiment, as reported by the lifecycle owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentState {
    /// Trials are being scheduled and trained.
    Active,
    /// Paused by a user; may resume.
    Paused,
    /// Shutting down after the searcher finished.
    StoppingCompleted,
    /// Shutting down after a cancellation request.
    StoppingCanceled,
    /// Shutting down after an unrecoverable error.
    StoppingError,
    /// Finished successfully.
    Completed,
    /// Canceled by a user.
    Canceled,
    /// Failed.
    Error,
}

impl ExperimentState {
    /// Returns true if no further metrics will be recorded in this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Error)
    }
}

/// Which family of metrics a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Averaged training-step metrics.
    Training,
    /// Validation metrics.
    Validation,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Training => f.write_str("training"),
            Self::Validation => f.write_str("validation"),
        }
    }
}

/// A single metric, chosen by exactly one of a training or validation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricSelector {
    kind: MetricKind,
    name: String,
}

impl MetricSelector {
    /// Selects a training metric.
    #[must_use]
    pub fn training(name: impl Into<String>) -> Self {
        Self {
            kind: MetricKind::Training,
            name: name.into(),
        }
    }

    /// Selects a validation metric.
    #[must_use]
    pub fn validation(name: impl Into<String>) -> Self {
        Self {
            kind: MetricKind::Validation,
            name: name.into(),
        }
    }

    /// Builds a selector from the two optional request fields.
    ///
    /// Empty strings count as absent, matching proto3 defaults.
    ///
    /// # Errors
    /// - `MissingMetricSelector` if neither name is given
    /// - `ConflictingMetricSelectors` if both are given
    pub fn from_request(
        training: Option<&str>,
        validation: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let training = training.filter(|name| !name.is_empty());
        let validation = validation.filter(|name| !name.is_empty());
        match (training, validation) {
            (Some(name), None) => Ok(Self::training(name)),
            (None, Some(name)) => Ok(Self::validation(name)),
            (None, None) => Err(ValidationError::MissingMetricSelector),
            (Some(_), Some(_)) => Err(ValidationError::ConflictingMetricSelectors),
        }
    }

    /// The metric family.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.kind
    }

    /// The metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} metric {}", self.kind, self.name)
    }
}
