//! Collaborator contracts consumed by the stream engine.
//!
//! The metric store and the experiment lifecycle are owned elsewhere in the
//! orchestration server. These traits are the only surface this crate uses:
//! read-only queries, no mutation of lifecycle state.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::experiment::{ExperimentId, ExperimentState, MetricKind};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Experiment not found.
    #[error("Experiment not found: {0}")]
    ExperimentNotFound(ExperimentId),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// A lock guarding backend state was poisoned.
    #[error("poisoned lock: {0}")]
    Poisoned(&'static str),
}

/// Distinct metric names recorded for an experiment so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricNames {
    /// Names found in training-step metrics.
    pub training: Vec<String>,
    /// Names found in validation metrics.
    pub validation: Vec<String>,
}

/// Batch indices recorded for one metric after a watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRecords {
    /// Cumulative batches processed at each matching record, in end-time order.
    pub batches: Vec<i32>,
    /// End time of the last matching record; `None` when nothing matched.
    pub watermark: Option<DateTime<Utc>>,
}

/// Read access to recorded training metrics.
pub trait MetricStore: Send + Sync {
    /// All training and validation metric names recorded for the experiment.
    fn metric_names(&self, experiment: ExperimentId) -> Result<MetricNames, StorageError>;

    /// Batch indices at which `name` was recorded, restricted to records with
    /// an end time strictly after `since`.
    fn metric_batches(
        &self,
        experiment: ExperimentId,
        kind: MetricKind,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<BatchRecords, StorageError>;

    /// The metric the experiment's searcher optimizes.
    fn searcher_metric(&self, experiment: ExperimentId) -> Result<String, StorageError>;
}

/// Read-only view of the experiment lifecycle state machine.
pub trait Lifecycle: Send + Sync {
    /// Current state of the experiment.
    ///
    /// # Errors
    /// - `ExperimentNotFound` if the experiment does not exist
    fn state(&self, experiment: ExperimentId) -> Result<ExperimentState, StorageError>;
}
