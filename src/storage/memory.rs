//! In-memory storage backend.
//!
//! Thread-safe implementation of both collaborator traits. It is intended for
//! embedded usage, tests, and as a reference for what a real metric store
//! must return.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::experiment::{ExperimentId, ExperimentState, MetricKind};
use crate::storage::traits::{BatchRecords, Lifecycle, MetricNames, MetricStore, StorageError};

/// One completed training step or validation, with the metric names it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    /// Training or validation.
    pub kind: MetricKind,
    /// Total batches the trial had processed when this record completed.
    pub batches_processed: u64,
    /// Completion time.
    pub end_time: DateTime<Utc>,
    /// Metric names present in the record.
    pub names: Vec<String>,
}

impl MetricRecord {
    /// A completed training step.
    pub fn training<I, S>(batches_processed: u64, end_time: DateTime<Utc>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: MetricKind::Training,
            batches_processed,
            end_time,
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// A completed validation.
    pub fn validation<I, S>(batches_processed: u64, end_time: DateTime<Utc>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: MetricKind::Validation,
            ..Self::training(batches_processed, end_time, names)
        }
    }

    fn carries(&self, kind: MetricKind, name: &str) -> bool {
        self.kind == kind && self.names.iter().any(|n| n == name)
    }
}

#[derive(Debug)]
struct ExperimentEntry {
    state: ExperimentState,
    searcher_metric: String,
    records: Vec<MetricRecord>,
}

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Poisoned(context)
}

/// In-memory metric store and lifecycle view.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    experiments: RwLock<HashMap<ExperimentId, ExperimentEntry>>,
    queries: AtomicU64,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an experiment in the `Active` state.
    ///
    /// # Errors
    /// - `BackendError` if the id is already registered
    pub fn create_experiment(
        &self,
        id: ExperimentId,
        searcher_metric: impl Into<String>,
    ) -> Result<(), StorageError> {
        let mut experiments = self
            .experiments
            .write()
            .map_err(|_| lock_err("experiment.create"))?;
        if experiments.contains_key(&id) {
            return Err(StorageError::BackendError(format!(
                "experiment {id} already exists"
            )));
        }
        experiments.insert(
            id,
            ExperimentEntry {
                state: ExperimentState::Active,
                searcher_metric: searcher_metric.into(),
                records: Vec::new(),
            },
        );
        Ok(())
    }

    /// Moves an experiment to a new lifecycle state.
    ///
    /// # Errors
    /// - `ExperimentNotFound` if the id is not registered
    pub fn set_state(&self, id: ExperimentId, state: ExperimentState) -> Result<(), StorageError> {
        let mut experiments = self
            .experiments
            .write()
            .map_err(|_| lock_err("experiment.set_state"))?;
        let entry = experiments
            .get_mut(&id)
            .ok_or(StorageError::ExperimentNotFound(id))?;
        entry.state = state;
        Ok(())
    }

    /// Appends a completed record to an experiment.
    ///
    /// # Errors
    /// - `ExperimentNotFound` if the id is not registered
    pub fn record(&self, id: ExperimentId, record: MetricRecord) -> Result<(), StorageError> {
        let mut experiments = self
            .experiments
            .write()
            .map_err(|_| lock_err("experiment.record"))?;
        let entry = experiments
            .get_mut(&id)
            .ok_or(StorageError::ExperimentNotFound(id))?;
        entry.records.push(record);
        Ok(())
    }

    /// Number of trait queries served so far.
    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    fn with_entry<T>(
        &self,
        id: ExperimentId,
        context: &'static str,
        f: impl FnOnce(&ExperimentEntry) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let experiments = self.experiments.read().map_err(|_| lock_err(context))?;
        let entry = experiments
            .get(&id)
            .ok_or(StorageError::ExperimentNotFound(id))?;
        f(entry)
    }
}

impl MetricStore for InMemoryStore {
    fn metric_names(&self, experiment: ExperimentId) -> Result<MetricNames, StorageError> {
        self.with_entry(experiment, "metric.names", |entry| {
            let mut training = BTreeSet::new();
            let mut validation = BTreeSet::new();
            for record in &entry.records {
                let target = match record.kind {
                    MetricKind::Training => &mut training,
                    MetricKind::Validation => &mut validation,
                };
                target.extend(record.names.iter().cloned());
            }
            Ok(MetricNames {
                training: training.into_iter().collect(),
                validation: validation.into_iter().collect(),
            })
        })
    }

    fn metric_batches(
        &self,
        experiment: ExperimentId,
        kind: MetricKind,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<BatchRecords, StorageError> {
        self.with_entry(experiment, "metric.batches", |entry| {
            let mut matching: Vec<&MetricRecord> = entry
                .records
                .iter()
                .filter(|r| r.end_time > since && r.carries(kind, name))
                .collect();
            matching.sort_by_key(|r| r.end_time);

            let mut out = BatchRecords::default();
            for record in matching {
                let batch = i32::try_from(record.batches_processed).map_err(|_| {
                    StorageError::BackendError(format!(
                        "batch index {} out of range",
                        record.batches_processed
                    ))
                })?;
                out.batches.push(batch);
                out.watermark = Some(record.end_time);
            }
            Ok(out)
        })
    }

    fn searcher_metric(&self, experiment: ExperimentId) -> Result<String, StorageError> {
        self.with_entry(experiment, "metric.searcher", |entry| {
            Ok(entry.searcher_metric.clone())
        })
    }
}

impl Lifecycle for InMemoryStore {
    fn state(&self, experiment: ExperimentId) -> Result<ExperimentState, StorageError> {
        self.with_entry(experiment, "lifecycle.state", |entry| Ok(entry.state))
    }
}
